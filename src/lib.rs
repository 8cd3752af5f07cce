//! Client-side favorites cache + sync engine and recommendation orchestrator
//! for the book catalog application.
//!
//! The catalog backend is the single source of truth for which books a user
//! has favorited. This crate keeps an in-memory mirror of that set consistent
//! with the server under optimistic, single-flight mutation, and derives
//! recommendation requests from the mirrored set. Everything else the
//! application does (book listing, comments, routing, auth) is pass-through
//! CRUD and lives outside this crate.

pub mod config;
pub mod error;
pub mod favorites;
pub mod gateway;
pub mod models;
pub mod recommendations;
pub mod session;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use favorites::{AddOutcome, FavoritesCache, FavoritesSyncEngine, RemoveOutcome, ToggleOutcome};
pub use gateway::{BackendGateway, GatewayError, HttpBackendGateway};
pub use models::{Book, FavoriteEntry, RecommendationRequest, RecommendationResult};
pub use recommendations::{RecommendationOrchestrator, RecommendationOutcome};
pub use session::Session;
