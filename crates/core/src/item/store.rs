//! Item store trait and error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{Item, ItemState};

/// Errors that can occur during item store operations.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Duplicate item: {source_url} is already queued for target {target} as {existing_id}")]
    DuplicateItem {
        source_url: String,
        target: String,
        existing_id: String,
    },

    #[error("Stale state for item {item_id}: expected {expected}, found {actual}")]
    StaleState {
        item_id: String,
        expected: ItemState,
        actual: ItemState,
    },

    #[error("Invalid transition for item {item_id}: {from} -> {to}")]
    InvalidTransition {
        item_id: String,
        from: ItemState,
        to: ItemState,
    },

    #[error("Database error: {0}")]
    Database(String),
}

/// Filter for listing items.
#[derive(Debug, Clone)]
pub struct ItemFilter {
    pub state: Option<ItemState>,
    pub target: Option<String>,
    /// Only items whose `retry_after` is unset or not after this instant.
    pub ready_at: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self {
            state: None,
            target: None,
            ready_at: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: ItemState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn ready_at(mut self, now: DateTime<Utc>) -> Self {
        self.ready_at = Some(now);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Canonical record of every item.
///
/// Listings are ordered by priority (highest first), then creation time,
/// then insertion order. `compare_and_transition` is the only mutation path
/// for an existing item and is durable before it returns.
pub trait ItemStore: Send + Sync {
    /// Insert a classified item.
    ///
    /// Fails with [`ItemError::DuplicateItem`] when an item with the same
    /// source URL and target exists in a non-terminal state.
    fn insert(&self, item: Item) -> Result<Item, ItemError>;

    fn get(&self, id: &str) -> Result<Option<Item>, ItemError>;

    fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>, ItemError>;

    fn count(&self, filter: &ItemFilter) -> Result<i64, ItemError>;

    /// Pending items in admission order.
    fn list_pending(&self) -> Result<Vec<Item>, ItemError> {
        self.list(&ItemFilter::new().with_state(ItemState::Pending))
    }

    /// Atomically move `id` from `expected` to `new`, applying `mutator` to
    /// the record in the same write.
    ///
    /// Fails with [`ItemError::StaleState`] when the current state is not
    /// `expected`, and with [`ItemError::InvalidTransition`] when the edge is
    /// not part of the state machine. The mutator cannot change the id,
    /// target, or state.
    fn compare_and_transition(
        &self,
        id: &str,
        expected: ItemState,
        new: ItemState,
        mutator: &mut dyn FnMut(&mut Item),
    ) -> Result<Item, ItemError>;

    /// Remove an item whatever its state. The engine only calls this for
    /// terminal items.
    fn delete(&self, id: &str) -> Result<Item, ItemError>;
}
