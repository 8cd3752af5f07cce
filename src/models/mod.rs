use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's bookmark of a book, identified by a server-assigned id
///
/// The server enforces at most one favorite per (user, book_name) and signals
/// a conflict on duplicates; the cache mirrors that invariant locally.
///
/// Favorites are matched to catalog books by title equality, not by book id.
/// Two distinct books sharing a title would collide here. The server contract
/// is title-keyed, so this is preserved rather than fixed client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub id: i64,
    pub user_id: i64,
    pub book_name: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only reference to a catalog book
///
/// Only the fields the favorites flow touches; listing, pagination and the
/// rest of the catalog surface live outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
}

/// Request sent to the recommendation engine
///
/// Transient per invocation; never persisted. The titles are exactly the
/// cached favorite book names at request time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRequest {
    pub user_id: i64,
    #[serde(rename = "user_book_titles")]
    pub titles: Vec<String>,
}

/// Response from the recommendation engine, surfaced verbatim
///
/// Any filtering, de-duplication against existing favorites, or ranking is a
/// server responsibility.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecommendationResult {
    pub recommended_titles: Vec<String>,
}

// ============================================================================
// Catalog Service Wire Types
// ============================================================================

/// Raw favorite-book record as the catalog service serializes it
///
/// Carries an `is_admin` flag the client has no use for; unknown or extra
/// fields are ignored on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiFavoriteBook {
    pub id: i64,
    pub user_id: i64,
    pub book_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    #[allow(dead_code)]
    pub is_admin: bool,
}

impl From<ApiFavoriteBook> for FavoriteEntry {
    fn from(api: ApiFavoriteBook) -> Self {
        FavoriteEntry {
            id: api.id,
            user_id: api.user_id,
            book_name: api.book_name,
            created_at: api.created_at,
        }
    }
}

/// Envelope for GET /favorite-books
#[derive(Debug, Deserialize)]
pub struct FavoriteListEnvelope {
    pub favorite_books: Vec<ApiFavoriteBook>,
}

/// Envelope for a 201 response to POST /favorite-books
#[derive(Debug, Deserialize)]
pub struct FavoriteCreatedEnvelope {
    pub favorite_book: ApiFavoriteBook,
}

/// Body for POST /favorite-books
#[derive(Debug, Serialize)]
pub struct AddFavoriteBody<'a> {
    pub book_name: &'a str,
}
