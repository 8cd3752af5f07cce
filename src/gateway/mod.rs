/// Backend gateway abstraction
///
/// This module is the only place the core touches the network. The favorites
/// CRUD endpoints and the recommendation engine sit behind one trait so the
/// sync engine and orchestrator can be exercised against mocks, and so the
/// HTTP plumbing stays out of the state-management logic.
use crate::{
    models::{FavoriteEntry, RecommendationRequest, RecommendationResult},
    session::Session,
};

pub mod http;

pub use http::HttpBackendGateway;

/// Typed failures at the backend seam
///
/// `Conflict` is not a failure from the engine's point of view: it confirms
/// the server already holds the favorite. Everything else propagates.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("already favorited")]
    Conflict,

    #[error("record not found")]
    NotFound,

    #[error("credential rejected")]
    Unauthorized,

    #[error("backend returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Trait for the typed request/response surface consumed by the core
///
/// Implementations return a result or a typed failure, never panic across
/// this boundary. The recommendation endpoint belongs to a distinct service
/// from the catalog backend and fails independently of it.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait BackendGateway: Send + Sync {
    /// Fetch the full favorites list for the session's user
    async fn list_favorites(&self, session: &Session) -> Result<Vec<FavoriteEntry>, GatewayError>;

    /// Create a favorite by book title; returns the server-assigned entry
    ///
    /// A duplicate favorite surfaces as `GatewayError::Conflict`.
    async fn add_favorite(
        &self,
        session: &Session,
        book_name: &str,
    ) -> Result<FavoriteEntry, GatewayError>;

    /// Delete a favorite by its server-assigned id
    async fn remove_favorite(
        &self,
        session: &Session,
        favorite_id: i64,
    ) -> Result<(), GatewayError>;

    /// Ask the recommendation engine for titles matching the request
    async fn fetch_recommendations(
        &self,
        session: &Session,
        request: RecommendationRequest,
    ) -> Result<RecommendationResult, GatewayError>;
}
