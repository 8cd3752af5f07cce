pub mod cache;
pub mod sync;

pub use cache::FavoritesCache;
pub use sync::{AddOutcome, FavoritesSyncEngine, RemoveOutcome, ToggleOutcome};
