//! Item model and storage.
//!
//! The store is the single source of truth for item state; all mutation of
//! an existing item goes through [`ItemStore::compare_and_transition`].

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteItemStore;
pub use store::{ItemError, ItemFilter, ItemStore};
pub use types::{
    ContentCategory, Item, ItemProgress, ItemState, LastError, Phase, Priority,
};
