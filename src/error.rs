use crate::gateway::GatewayError;

/// Application-level errors
///
/// Every failure is returned to the caller as a typed outcome; nothing is
/// silently swallowed and nothing is retried at this layer. Callers are
/// expected to present `Unauthenticated` as a login prompt and the rest as
/// retryable conditions.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("no authenticated session")]
    Unauthenticated,

    #[error("a mutation for {0} is already in flight")]
    AlreadyInProgress(String),

    #[error("favorites refresh failed: {0}")]
    RefreshFailed(#[source] GatewayError),

    #[error("add favorite failed: {0}")]
    AddFailed(#[source] GatewayError),

    #[error("remove favorite failed: {0}")]
    RemoveFailed(#[source] GatewayError),

    #[error("no favorite books to derive recommendations from")]
    NoFavorites,

    #[error("recommendation request failed: {0}")]
    RecommendationRequestFailed(#[source] GatewayError),
}

pub type CoreResult<T> = Result<T, CoreError>;
