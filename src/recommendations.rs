use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{
    error::{CoreError, CoreResult},
    favorites::FavoritesCache,
    gateway::BackendGateway,
    models::{RecommendationRequest, RecommendationResult},
    session::Session,
};

/// Outcome of a recommendation request under last-request-wins ordering
#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationOutcome {
    /// The freshest response; safe to surface
    Fresh(RecommendationResult),
    /// A newer request was issued while this one was suspended at the
    /// network boundary; the caller must discard this response
    Superseded,
}

/// Derives recommendation requests from the favorites cache and reconciles
/// the asynchronous responses
///
/// Unlike favorites mutation there is no single-flight guard here:
/// invocations may overlap freely, and supersession decides which response
/// the caller keeps. The recommendation engine is a separate service from
/// the catalog backend and fails independently of it; failures are reported
/// without retry and without falling back to stale results.
pub struct RecommendationOrchestrator {
    gateway: Arc<dyn BackendGateway>,
    cache: Arc<RwLock<FavoritesCache>>,
    latest_request: AtomicU64,
}

impl RecommendationOrchestrator {
    /// Creates an orchestrator reading from the sync engine's cache handle
    pub fn new(gateway: Arc<dyn BackendGateway>, cache: Arc<RwLock<FavoritesCache>>) -> Self {
        Self {
            gateway,
            cache,
            latest_request: AtomicU64::new(0),
        }
    }

    /// Requests recommendations for the session's favorite titles
    ///
    /// Hard preconditions: the session is authenticated and the cache is
    /// non-empty; a recommendation is never requested with an empty title
    /// set, and the gateway is not touched in either failure case. The
    /// request titles are exactly the cached book names (already
    /// deduplicated by the cache invariant), and the returned titles are
    /// surfaced verbatim.
    pub async fn get_recommendations(
        &self,
        session: &Session,
    ) -> CoreResult<RecommendationOutcome> {
        if !session.is_authenticated {
            return Err(CoreError::Unauthenticated);
        }

        let titles = self.cache.read().await.titles();
        if titles.is_empty() {
            tracing::debug!("Recommendation request refused: no favorites cached");
            return Err(CoreError::NoFavorites);
        }

        let seq = self.latest_request.fetch_add(1, Ordering::SeqCst) + 1;
        let request = RecommendationRequest {
            user_id: session.user_id,
            titles,
        };

        tracing::debug!(seq, count = request.titles.len(), "Requesting recommendations");

        let result = self.gateway.fetch_recommendations(session, request).await;

        // Last-request-wins: a response whose request was overtaken by a
        // newer one is stale regardless of whether it succeeded.
        if self.latest_request.load(Ordering::SeqCst) != seq {
            tracing::debug!(seq, "Recommendation response superseded by a newer request");
            return Ok(RecommendationOutcome::Superseded);
        }

        match result {
            Ok(result) => {
                tracing::info!(
                    user_id = session.user_id,
                    recommended = result.recommended_titles.len(),
                    "Recommendations resolved"
                );
                Ok(RecommendationOutcome::Fresh(result))
            }
            Err(e) => {
                tracing::error!(error = %e, "Recommendation request failed");
                Err(CoreError::RecommendationRequestFailed(e))
            }
        }
    }
}
