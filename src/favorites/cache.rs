use crate::models::FavoriteEntry;

/// In-memory mirror of the session's favorite set
///
/// Pure data holder with no network access and no failure modes; the sync
/// engine is the sole writer and carries all validation. Insertion order is
/// preserved and at most one entry exists per `book_name`.
///
/// Lookups are keyed by book title, matching the server contract. Titles are
/// compared for exact equality.
#[derive(Debug, Clone, Default)]
pub struct FavoritesCache {
    entries: Vec<FavoriteEntry>,
}

impl FavoritesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents wholesale; used after a full refresh
    ///
    /// Duplicate titles are dropped keeping the first occurrence, so the
    /// one-entry-per-title invariant holds even against a misbehaving server.
    pub fn load(&mut self, entries: Vec<FavoriteEntry>) {
        self.entries.clear();
        for entry in entries {
            if !self.contains(&entry.book_name) {
                self.entries.push(entry);
            }
        }
    }

    pub fn contains(&self, book_title: &str) -> bool {
        self.entries.iter().any(|e| e.book_name == book_title)
    }

    pub fn find(&self, book_title: &str) -> Option<&FavoriteEntry> {
        self.entries.iter().find(|e| e.book_name == book_title)
    }

    pub fn find_by_id(&self, favorite_id: i64) -> Option<&FavoriteEntry> {
        self.entries.iter().find(|e| e.id == favorite_id)
    }

    /// Inserts the entry, replacing any existing entry for the same title in
    /// place
    pub fn upsert(&mut self, entry: FavoriteEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.book_name == entry.book_name)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Removes the entry with the given id, returning it together with its
    /// position so the caller can restore it on a failed delete
    pub fn remove_by_id(&mut self, favorite_id: i64) -> Option<(usize, FavoriteEntry)> {
        let index = self.entries.iter().position(|e| e.id == favorite_id)?;
        Some((index, self.entries.remove(index)))
    }

    /// Reinserts an entry at its original position after a rolled-back remove
    pub fn restore(&mut self, index: usize, entry: FavoriteEntry) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, entry);
    }

    pub fn entries(&self) -> &[FavoriteEntry] {
        &self.entries
    }

    /// Book titles in insertion order; deduplicated by the cache invariant
    pub fn titles(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.book_name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
