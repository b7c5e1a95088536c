//! SQLite-backed item store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{Item, ItemError, ItemFilter, ItemState, ItemStore};

const TERMINAL_STATES: &str = "('completed', 'cancelled', 'failed')";

/// SQLite-backed item store.
///
/// The full record is kept as JSON in `data`; the columns next to it exist
/// for filtering and ordering.
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    /// Create a new SQLite item store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, ItemError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite item store (useful for testing).
    pub fn in_memory() -> Result<Self, ItemError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ItemError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                target TEXT NOT NULL,
                state TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at_us INTEGER NOT NULL,
                retry_after_us INTEGER,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_queue
                ON items(state, priority DESC, created_at_us ASC);
            CREATE INDEX IF NOT EXISTS idx_items_source_target ON items(source_url, target);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ItemError> {
        self.conn
            .lock()
            .map_err(|_| ItemError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &ItemFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.state_type()));
        }

        if let Some(ref target) = filter.target {
            conditions.push("target = ?");
            params.push(Box::new(target.clone()));
        }

        if let Some(ready_at) = filter.ready_at {
            conditions.push("(retry_after_us IS NULL OR retry_after_us <= ?)");
            params.push(Box::new(ready_at.timestamp_micros()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<Item> {
        let data: String = row.get(0)?;
        serde_json::from_str(&data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    fn load(tx: &Transaction<'_>, id: &str) -> Result<Option<Item>, ItemError> {
        tx.query_row(
            "SELECT data FROM items WHERE id = ?",
            params![id],
            Self::row_to_item,
        )
        .optional()
        .map_err(db_err)
    }

    fn encode(item: &Item) -> Result<String, ItemError> {
        serde_json::to_string(item).map_err(|e| ItemError::Database(e.to_string()))
    }
}

fn db_err(e: rusqlite::Error) -> ItemError {
    ItemError::Database(e.to_string())
}

impl ItemStore for SqliteItemStore {
    fn insert(&self, item: Item) -> Result<Item, ItemError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let existing: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT id FROM items WHERE source_url = ? AND target = ? AND state NOT IN {} LIMIT 1",
                    TERMINAL_STATES
                ),
                params![item.source_url, item.target],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        if let Some(existing_id) = existing {
            return Err(ItemError::DuplicateItem {
                source_url: item.source_url,
                target: item.target,
                existing_id,
            });
        }

        tx.execute(
            "INSERT INTO items (id, source_url, target, state, priority, created_at_us, retry_after_us, data, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id,
                item.source_url,
                item.target,
                item.state.state_type(),
                item.priority.rank(),
                item.created_at.timestamp_micros(),
                item.retry_after.map(|t| t.timestamp_micros()),
                Self::encode(&item)?,
                item.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(item)
    }

    fn get(&self, id: &str) -> Result<Option<Item>, ItemError> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT data FROM items WHERE id = ?",
            params![id],
            Self::row_to_item,
        )
        .optional()
        .map_err(db_err)
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>, ItemError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT data FROM items {} ORDER BY priority DESC, created_at_us ASC, rowid ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_item)
            .map_err(db_err)?;

        let mut items = Vec::new();
        for row_result in rows {
            items.push(row_result.map_err(db_err)?);
        }

        Ok(items)
    }

    fn count(&self, filter: &ItemFilter) -> Result<i64, ItemError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM items {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn compare_and_transition(
        &self,
        id: &str,
        expected: ItemState,
        new: ItemState,
        mutator: &mut dyn FnMut(&mut Item),
    ) -> Result<Item, ItemError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let current = Self::load(&tx, id)?.ok_or_else(|| ItemError::NotFound(id.to_string()))?;

        if current.state != expected {
            return Err(ItemError::StaleState {
                item_id: id.to_string(),
                expected,
                actual: current.state,
            });
        }

        if !expected.can_transition_to(new) {
            return Err(ItemError::InvalidTransition {
                item_id: id.to_string(),
                from: expected,
                to: new,
            });
        }

        let mut updated = current.clone();
        mutator(&mut updated);
        updated.id = current.id;
        updated.target = current.target;
        updated.state = new;
        updated.updated_at = Utc::now();

        let changed = tx
            .execute(
                "UPDATE items SET state = ?, priority = ?, retry_after_us = ?, data = ?, updated_at = ? WHERE id = ? AND state = ?",
                params![
                    new.state_type(),
                    updated.priority.rank(),
                    updated.retry_after.map(|t| t.timestamp_micros()),
                    Self::encode(&updated)?,
                    updated.updated_at.to_rfc3339(),
                    id,
                    expected.state_type(),
                ],
            )
            .map_err(db_err)?;

        if changed != 1 {
            return Err(ItemError::Database(format!(
                "conditional update of {} touched {} rows",
                id, changed
            )));
        }

        tx.commit().map_err(db_err)?;
        Ok(updated)
    }

    fn delete(&self, id: &str) -> Result<Item, ItemError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let item = Self::load(&tx, id)?.ok_or_else(|| ItemError::NotFound(id.to_string()))?;

        tx.execute("DELETE FROM items WHERE id = ?", params![id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use crate::item::Priority;
    use chrono::Duration;

    fn create_test_store() -> SqliteItemStore {
        SqliteItemStore::in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let store = create_test_store();
        let item = fixtures::item("Arrival", "http://cdn/arrival.mp4", Priority::High);

        let inserted = store.insert(item.clone()).unwrap();
        let fetched = store.get(&inserted.id).unwrap().unwrap();

        assert_eq!(fetched, item);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_while_non_terminal() {
        let store = create_test_store();
        let first = fixtures::item("Arrival", "http://cdn/arrival.mp4", Priority::High);
        store.insert(first.clone()).unwrap();

        let second = fixtures::item("Arrival", "http://cdn/arrival.mp4", Priority::High);
        let result = store.insert(second);
        assert!(matches!(
            result,
            Err(ItemError::DuplicateItem { ref existing_id, .. }) if *existing_id == first.id
        ));
    }

    #[test]
    fn test_same_url_other_target_is_not_duplicate() {
        let store = create_test_store();
        store
            .insert(fixtures::item("Arrival", "http://cdn/arrival.mp4", Priority::High))
            .unwrap();

        let mut other = fixtures::item("Arrival", "http://cdn/arrival.mp4", Priority::High);
        other.target = "archive".to_string();
        assert!(store.insert(other).is_ok());
    }

    #[test]
    fn test_resubmission_after_terminal() {
        let store = create_test_store();
        let first = fixtures::item("Arrival", "http://cdn/arrival.mp4", Priority::High);
        store.insert(first.clone()).unwrap();
        store
            .compare_and_transition(&first.id, ItemState::Pending, ItemState::Cancelled, &mut |_| {})
            .unwrap();

        let again = fixtures::item("Arrival", "http://cdn/arrival.mp4", Priority::High);
        assert!(store.insert(again).is_ok());
    }

    #[test]
    fn test_list_orders_by_priority_then_created_at() {
        let store = create_test_store();
        let base = Utc::now();

        let mut a = fixtures::item("A", "http://cdn/a", Priority::High);
        a.created_at = base + Duration::seconds(1);
        let mut b = fixtures::item("B", "http://cdn/b", Priority::Medium);
        b.created_at = base;
        let mut c = fixtures::item("C", "http://cdn/c", Priority::High);
        c.created_at = base + Duration::seconds(2);

        store.insert(c).unwrap();
        store.insert(b).unwrap();
        store.insert(a).unwrap();

        let titles: Vec<String> = store
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_equal_created_at_keeps_insertion_order() {
        let store = create_test_store();
        let now = Utc::now();
        for title in ["first", "second", "third"] {
            let mut item = fixtures::item(title, &format!("http://cdn/{}", title), Priority::Low);
            item.created_at = now;
            store.insert(item).unwrap();
        }

        let titles: Vec<String> = store
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_compare_and_transition_applies_mutator() {
        let store = create_test_store();
        let item = store
            .insert(fixtures::item("A", "http://cdn/a", Priority::High))
            .unwrap();

        let updated = store
            .compare_and_transition(&item.id, ItemState::Pending, ItemState::Acquiring, &mut |i| {
                i.acquisition_attempts = 1;
                i.target = "elsewhere".to_string();
            })
            .unwrap();

        assert_eq!(updated.state, ItemState::Acquiring);
        assert_eq!(updated.acquisition_attempts, 1);
        assert_eq!(updated.target, item.target);

        let persisted = store.get(&item.id).unwrap().unwrap();
        assert_eq!(persisted.state, ItemState::Acquiring);
        assert_eq!(persisted.acquisition_attempts, 1);
    }

    #[test]
    fn test_compare_and_transition_stale() {
        let store = create_test_store();
        let item = store
            .insert(fixtures::item("A", "http://cdn/a", Priority::High))
            .unwrap();

        let result = store.compare_and_transition(
            &item.id,
            ItemState::Acquired,
            ItemState::Transferring,
            &mut |_| {},
        );
        assert!(matches!(
            result,
            Err(ItemError::StaleState {
                actual: ItemState::Pending,
                ..
            })
        ));
    }

    #[test]
    fn test_compare_and_transition_rejects_illegal_edge() {
        let store = create_test_store();
        let item = store
            .insert(fixtures::item("A", "http://cdn/a", Priority::High))
            .unwrap();

        let result = store.compare_and_transition(
            &item.id,
            ItemState::Pending,
            ItemState::Completed,
            &mut |_| {},
        );
        assert!(matches!(result, Err(ItemError::InvalidTransition { .. })));
        assert_eq!(
            store.get(&item.id).unwrap().unwrap().state,
            ItemState::Pending
        );
    }

    #[test]
    fn test_compare_and_transition_missing() {
        let store = create_test_store();
        let result = store.compare_and_transition(
            "nope",
            ItemState::Pending,
            ItemState::Acquiring,
            &mut |_| {},
        );
        assert!(matches!(result, Err(ItemError::NotFound(_))));
    }

    #[test]
    fn test_ready_at_filter() {
        let store = create_test_store();
        let now = Utc::now();
        let mut waiting = fixtures::item("waiting", "http://cdn/w", Priority::High);
        waiting.retry_after = Some(now + Duration::seconds(60));
        let ready = fixtures::item("ready", "http://cdn/r", Priority::Low);
        store.insert(waiting).unwrap();
        store.insert(ready).unwrap();

        let filter = ItemFilter::new()
            .with_state(ItemState::Pending)
            .ready_at(now);
        let titles: Vec<String> = store
            .list(&filter)
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["ready"]);
        assert_eq!(store.count(&ItemFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        let item = store
            .insert(fixtures::item("A", "http://cdn/a", Priority::High))
            .unwrap();

        let deleted = store.delete(&item.id).unwrap();
        assert_eq!(deleted.id, item.id);
        assert!(store.get(&item.id).unwrap().is_none());
        assert!(matches!(store.delete(&item.id), Err(ItemError::NotFound(_))));
    }

    #[test]
    fn test_file_based_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("items.db");

        let id = {
            let store = SqliteItemStore::new(&db_path).unwrap();
            let item = store
                .insert(fixtures::item("A", "http://cdn/a", Priority::High))
                .unwrap();
            store
                .compare_and_transition(&item.id, ItemState::Pending, ItemState::Acquiring, &mut |_| {})
                .unwrap();
            item.id
        };

        let reopened = SqliteItemStore::new(&db_path).unwrap();
        let item = reopened.get(&id).unwrap().unwrap();
        assert_eq!(item.state, ItemState::Acquiring);
    }
}
