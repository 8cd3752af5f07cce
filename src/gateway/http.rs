/// HTTP implementation of the backend gateway
///
/// Talks to two services: the book catalog (favorites CRUD) and the
/// recommendation engine. Each outbound request carries the session's bearer
/// credential and a generated correlation id so server logs can be tied back
/// to a client operation.
use std::time::Duration;

use reqwest::{Client as HttpClient, StatusCode};
use uuid::Uuid;

use crate::{
    config::Config,
    gateway::{BackendGateway, GatewayError},
    models::{
        AddFavoriteBody, FavoriteCreatedEnvelope, FavoriteEntry, FavoriteListEnvelope,
        RecommendationRequest, RecommendationResult,
    },
    session::Session,
};

/// HTTP header name for the correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct HttpBackendGateway {
    http_client: HttpClient,
    catalog_url: String,
    recommendation_url: String,
}

impl HttpBackendGateway {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            catalog_url: config.catalog_url.clone(),
            recommendation_url: config.recommendation_url.clone(),
        })
    }

    fn correlation_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Maps a non-success status to the gateway error taxonomy
    fn map_status(status: StatusCode, body: String) -> GatewayError {
        match status {
            StatusCode::CONFLICT => GatewayError::Conflict,
            StatusCode::NOT_FOUND => GatewayError::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized,
            _ => GatewayError::Api {
                status: status.as_u16(),
                body,
            },
        }
    }

    async fn error_for(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::map_status(status, body)
    }
}

#[async_trait::async_trait]
impl BackendGateway for HttpBackendGateway {
    async fn list_favorites(&self, session: &Session) -> Result<Vec<FavoriteEntry>, GatewayError> {
        let url = format!("{}/favorite-books", self.catalog_url);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&session.credential)
            .header(REQUEST_ID_HEADER, Self::correlation_id())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let envelope: FavoriteListEnvelope = response.json().await?;
        let entries: Vec<FavoriteEntry> = envelope
            .favorite_books
            .into_iter()
            .map(FavoriteEntry::from)
            .collect();

        tracing::info!(
            user_id = session.user_id,
            count = entries.len(),
            "Favorites listed"
        );

        Ok(entries)
    }

    async fn add_favorite(
        &self,
        session: &Session,
        book_name: &str,
    ) -> Result<FavoriteEntry, GatewayError> {
        let url = format!("{}/favorite-books", self.catalog_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&session.credential)
            .header(REQUEST_ID_HEADER, Self::correlation_id())
            .json(&AddFavoriteBody { book_name })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let envelope: FavoriteCreatedEnvelope = response.json().await?;
        let entry = FavoriteEntry::from(envelope.favorite_book);

        tracing::info!(favorite_id = entry.id, book = %book_name, "Favorite created");

        Ok(entry)
    }

    async fn remove_favorite(
        &self,
        session: &Session,
        favorite_id: i64,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/favorite-books/{}", self.catalog_url, favorite_id);
        let response = self
            .http_client
            .delete(&url)
            .bearer_auth(&session.credential)
            .header(REQUEST_ID_HEADER, Self::correlation_id())
            .send()
            .await?;

        // 200 with a message body or a bare 204 both count as success
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        tracing::info!(favorite_id, "Favorite deleted");

        Ok(())
    }

    async fn fetch_recommendations(
        &self,
        session: &Session,
        request: RecommendationRequest,
    ) -> Result<RecommendationResult, GatewayError> {
        let url = format!("{}/recommendations", self.recommendation_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&session.credential)
            .header(REQUEST_ID_HEADER, Self::correlation_id())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let result: RecommendationResult = response.json().await?;

        tracing::info!(
            user_id = request.user_id,
            sent = request.titles.len(),
            recommended = result.recommended_titles.len(),
            "Recommendations fetched"
        );

        Ok(result)
    }
}
