//! Local store for events and scanned codes

use libsql::{params, Connection, Row, Value};

use super::rows::{flag, optional_text, text_or_null};
use crate::error::{Error, Result};
use crate::models::{CodeFilter, Event, EventFilter, ScannedCode};

const EVENT_COLUMNS: &str = "id, name, created_at, qr_count, revision, is_deleted, is_confirmed";
const CODE_COLUMNS: &str = "id, event_id, content, category, summary, processed, scanned_at, \
     revision, is_deleted, is_confirmed";

/// Trait for local event/code storage (async)
///
/// Every method is atomic for the record it touches. Callers that need
/// several writes to land together wrap them in [`super::begin`] /
/// [`super::finish`].
#[allow(async_fn_in_trait)]
pub trait LocalStore {
    /// Get an event by id, tombstoned or not
    async fn get_event(&self, id: &str) -> Result<Option<Event>>;

    /// List events, newest first
    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>>;

    /// Insert or update an event
    async fn put_event(&self, event: &Event) -> Result<()>;

    /// Hard delete an event and its codes
    async fn delete_event(&self, id: &str) -> Result<bool>;

    /// Mark an event and all of its codes as pending delete
    async fn tombstone_event(&self, id: &str) -> Result<bool>;

    /// Undo a tombstone after the remote refused the delete.
    ///
    /// Confirmed codes come back; never-confirmed codes are dropped since
    /// their queued uploads were cancelled along with the delete.
    async fn restore_event(&self, id: &str) -> Result<bool>;

    /// Swap a temporary event for its confirmed version, moving its codes
    async fn replace_event_id(&self, temp_id: &str, confirmed: &Event) -> Result<()>;

    /// Get a code by id, tombstoned or not
    async fn get_code(&self, id: &str) -> Result<Option<ScannedCode>>;

    /// List codes in insertion order
    async fn list_codes(&self, filter: &CodeFilter) -> Result<Vec<ScannedCode>>;

    /// Live codes of one event, in insertion order
    async fn list_codes_by_event(&self, event_id: &str) -> Result<Vec<ScannedCode>> {
        self.list_codes(&CodeFilter::for_event(event_id)).await
    }

    /// Insert or update a code; the owning event must be live unless the
    /// code itself is tombstoned
    async fn put_code(&self, code: &ScannedCode) -> Result<()>;

    /// Swap a temporary code for its confirmed version, keeping its position
    async fn replace_code_id(&self, temp_id: &str, confirmed: &ScannedCode) -> Result<()>;

    /// Hard delete a code
    async fn delete_code(&self, id: &str) -> Result<bool>;

    /// Recompute `qr_count` from live codes
    async fn refresh_event_count(&self, event_id: &str) -> Result<i64>;
}

/// libSQL implementation of `LocalStore`
pub struct LibSqlLocalStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlLocalStore<'a> {
    /// Create a new store over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_event(row: &Row) -> Result<Event> {
        Ok(Event {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            qr_count: row.get(3)?,
            revision: row.get(4)?,
            is_deleted: flag(row, 5)?,
            is_confirmed: flag(row, 6)?,
        })
    }

    fn parse_code(row: &Row) -> Result<ScannedCode> {
        Ok(ScannedCode {
            id: row.get(0)?,
            event_id: row.get(1)?,
            content: row.get(2)?,
            category: optional_text(row, 3)?,
            summary: optional_text(row, 4)?,
            processed: flag(row, 5)?,
            scanned_at: row.get(6)?,
            revision: row.get(7)?,
            is_deleted: flag(row, 8)?,
            is_confirmed: flag(row, 9)?,
        })
    }

    /// The referential rule for codes: a live code needs a live event
    async fn check_code_reference(&self, code: &ScannedCode) -> Result<()> {
        match self.get_event(&code.event_id).await? {
            None => Err(Error::Integrity(format!(
                "code {} references missing event {}",
                code.id, code.event_id
            ))),
            Some(event) if event.is_deleted && !code.is_deleted => Err(Error::Integrity(format!(
                "code {} references deleted event {}",
                code.id, code.event_id
            ))),
            Some(_) => Ok(()),
        }
    }
}

impl LocalStore for LibSqlLocalStore<'_> {
    async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"),
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_event(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events {} ORDER BY created_at DESC, rowid DESC",
            filter.where_clause()
        );
        let mut rows = self.conn.query(&sql, ()).await?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(Self::parse_event(&row)?);
        }
        Ok(events)
    }

    async fn put_event(&self, event: &Event) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO events (id, name, created_at, qr_count, revision, is_deleted, is_confirmed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    created_at = excluded.created_at,
                    qr_count = excluded.qr_count,
                    revision = excluded.revision,
                    is_deleted = excluded.is_deleted,
                    is_confirmed = excluded.is_confirmed",
                params![
                    event.id.as_str(),
                    event.name.as_str(),
                    event.created_at,
                    event.qr_count,
                    event.revision,
                    i64::from(event.is_deleted),
                    i64::from(event.is_confirmed)
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete_event(&self, id: &str) -> Result<bool> {
        // codes go with it through ON DELETE CASCADE
        let rows = self
            .conn
            .execute("DELETE FROM events WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    async fn tombstone_event(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE events SET is_deleted = 1 WHERE id = ? AND is_deleted = 0",
                [id],
            )
            .await?;
        if rows == 0 {
            return Ok(false);
        }
        self.conn
            .execute("UPDATE codes SET is_deleted = 1 WHERE event_id = ?", [id])
            .await?;
        Ok(true)
    }

    async fn restore_event(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE events SET is_deleted = 0 WHERE id = ? AND is_deleted = 1",
                [id],
            )
            .await?;
        if rows == 0 {
            return Ok(false);
        }
        self.conn
            .execute(
                "DELETE FROM codes WHERE event_id = ? AND is_confirmed = 0",
                [id],
            )
            .await?;
        self.conn
            .execute("UPDATE codes SET is_deleted = 0 WHERE event_id = ?", [id])
            .await?;
        self.refresh_event_count(id).await?;
        Ok(true)
    }

    async fn replace_event_id(&self, temp_id: &str, confirmed: &Event) -> Result<()> {
        let Some(local) = self.get_event(temp_id).await? else {
            return Err(Error::NotFound(format!("event {temp_id}")));
        };

        let merged = Event {
            is_deleted: local.is_deleted,
            is_confirmed: true,
            ..confirmed.clone()
        };

        if temp_id != confirmed.id && self.get_event(&confirmed.id).await?.is_some() {
            // The confirmed row already exists (pulled earlier): move codes over
            self.put_event(&merged).await?;
            self.conn
                .execute(
                    "UPDATE codes SET event_id = ?1 WHERE event_id = ?2",
                    [confirmed.id.as_str(), temp_id],
                )
                .await?;
            self.delete_event(temp_id).await?;
        } else {
            // Renaming the key cascades to codes.event_id
            self.conn
                .execute(
                    "UPDATE events SET id = ?1, name = ?2, created_at = ?3, revision = ?4,
                        is_confirmed = 1
                     WHERE id = ?5",
                    params![
                        merged.id.as_str(),
                        merged.name.as_str(),
                        merged.created_at,
                        merged.revision,
                        temp_id
                    ],
                )
                .await?;
        }

        self.refresh_event_count(&merged.id).await?;
        Ok(())
    }

    async fn get_code(&self, id: &str) -> Result<Option<ScannedCode>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CODE_COLUMNS} FROM codes WHERE id = ?"),
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_code(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_codes(&self, filter: &CodeFilter) -> Result<Vec<ScannedCode>> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(event_id) = &filter.event_id {
            conditions.push("event_id = ?");
            values.push(Value::Text(event_id.clone()));
        }
        if let Some(processed) = filter.processed {
            conditions.push("processed = ?");
            values.push(Value::Integer(i64::from(processed)));
        }
        if !filter.include_deleted {
            conditions.push("is_deleted = 0");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT {CODE_COLUMNS} FROM codes {where_clause} ORDER BY seq ASC");

        let mut rows = self.conn.query(&sql, values).await?;
        let mut codes = Vec::new();
        while let Some(row) = rows.next().await? {
            codes.push(Self::parse_code(&row)?);
        }
        Ok(codes)
    }

    async fn put_code(&self, code: &ScannedCode) -> Result<()> {
        self.check_code_reference(code).await?;

        self.conn
            .execute(
                "INSERT INTO codes (id, event_id, content, category, summary, processed,
                    scanned_at, revision, is_deleted, is_confirmed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    event_id = excluded.event_id,
                    content = excluded.content,
                    category = excluded.category,
                    summary = excluded.summary,
                    processed = excluded.processed,
                    scanned_at = excluded.scanned_at,
                    revision = excluded.revision,
                    is_deleted = excluded.is_deleted,
                    is_confirmed = excluded.is_confirmed",
                params![
                    code.id.as_str(),
                    code.event_id.as_str(),
                    code.content.as_str(),
                    text_or_null(code.category.as_deref()),
                    text_or_null(code.summary.as_deref()),
                    i64::from(code.processed),
                    code.scanned_at,
                    code.revision,
                    i64::from(code.is_deleted),
                    i64::from(code.is_confirmed)
                ],
            )
            .await?;
        Ok(())
    }

    async fn replace_code_id(&self, temp_id: &str, confirmed: &ScannedCode) -> Result<()> {
        self.check_code_reference(confirmed).await?;

        if temp_id != confirmed.id && self.get_code(&confirmed.id).await?.is_some() {
            self.delete_code(temp_id).await?;
            return self.put_code(confirmed).await;
        }

        let rows = self
            .conn
            .execute(
                "UPDATE codes SET id = ?1, event_id = ?2, content = ?3, category = ?4,
                    summary = ?5, processed = ?6, scanned_at = ?7, revision = ?8,
                    is_deleted = ?9, is_confirmed = ?10
                 WHERE id = ?11",
                params![
                    confirmed.id.as_str(),
                    confirmed.event_id.as_str(),
                    confirmed.content.as_str(),
                    text_or_null(confirmed.category.as_deref()),
                    text_or_null(confirmed.summary.as_deref()),
                    i64::from(confirmed.processed),
                    confirmed.scanned_at,
                    confirmed.revision,
                    i64::from(confirmed.is_deleted),
                    i64::from(confirmed.is_confirmed),
                    temp_id
                ],
            )
            .await?;

        if rows == 0 {
            // Optimistic row is gone (event restored or purged); store as new
            self.put_code(confirmed).await?;
        }
        Ok(())
    }

    async fn delete_code(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM codes WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    async fn refresh_event_count(&self, event_id: &str) -> Result<i64> {
        self.conn
            .execute(
                "UPDATE events SET qr_count = (
                    SELECT COUNT(*) FROM codes WHERE event_id = ?1 AND is_deleted = 0
                 ) WHERE id = ?1",
                [event_id],
            )
            .await?;

        Ok(self
            .get_event(event_id)
            .await?
            .map_or(0, |event| event.qr_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn confirmed_event(id: &str, name: &str) -> Event {
        Event {
            id: id.to_string(),
            name: name.to_string(),
            created_at: 1_000,
            qr_count: 0,
            revision: 1,
            is_deleted: false,
            is_confirmed: true,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get_event() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let event = Event::new_local("Career fair", 10);
        store.put_event(&event).await.unwrap();

        let fetched = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(fetched, event);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_event_upserts() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let mut event = confirmed_event("evt-1", "Expo");
        store.put_event(&event).await.unwrap();
        event.name = "Expo 2026".to_string();
        event.revision = 2;
        store.put_event(&event).await.unwrap();

        let events = store.list_events(EventFilter::All).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Expo 2026");
        assert_eq!(events[0].revision, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_codes_by_event_in_insertion_order() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let event = Event::new_local("Meetup", 0);
        store.put_event(&event).await.unwrap();

        // scanned_at deliberately out of order: listing follows insertion
        for (content, scanned_at) in [("c", 30), ("a", 10), ("b", 20)] {
            let code = ScannedCode::new_local(&event.id, content, scanned_at);
            store.put_code(&code).await.unwrap();
        }

        let contents: Vec<String> = store
            .list_codes_by_event(&event.id)
            .await
            .unwrap()
            .into_iter()
            .map(|code| code.content)
            .collect();
        assert_eq!(contents, vec!["c", "a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_code_rejects_missing_event() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let code = ScannedCode::new_local("nope", "content", 0);
        let result = store.put_code(&code).await;
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tombstone_hides_event_and_codes() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let event = Event::new_local("Gone soon", 0);
        store.put_event(&event).await.unwrap();
        store
            .put_code(&ScannedCode::new_local(&event.id, "x", 0))
            .await
            .unwrap();

        assert!(store.tombstone_event(&event.id).await.unwrap());
        assert!(!store.tombstone_event(&event.id).await.unwrap());

        assert!(store.list_events(EventFilter::Live).await.unwrap().is_empty());
        assert_eq!(
            store.list_events(EventFilter::Tombstoned).await.unwrap().len(),
            1
        );
        assert!(store.list_codes_by_event(&event.id).await.unwrap().is_empty());

        // A live code cannot be added under a tombstoned event
        let late = ScannedCode::new_local(&event.id, "late", 0);
        assert!(matches!(
            store.put_code(&late).await,
            Err(Error::Integrity(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_event_cascades_to_codes() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let event = confirmed_event("evt-1", "Expo");
        store.put_event(&event).await.unwrap();
        let code = ScannedCode::new_local("evt-1", "x", 0);
        store.put_code(&code).await.unwrap();

        assert!(store.delete_event("evt-1").await.unwrap());
        assert!(store.get_code(&code.id).await.unwrap().is_none());
        assert!(!store.delete_event("evt-1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_event_id_moves_codes() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let local = Event::new_local("Hackathon", 5);
        store.put_event(&local).await.unwrap();
        store
            .put_code(&ScannedCode::new_local(&local.id, "one", 6))
            .await
            .unwrap();

        let remote = confirmed_event("65f000000000000000000001", "Hackathon");
        store.replace_event_id(&local.id, &remote).await.unwrap();

        assert!(store.get_event(&local.id).await.unwrap().is_none());
        let stored = store.get_event(&remote.id).await.unwrap().unwrap();
        assert!(stored.is_confirmed);
        assert_eq!(stored.qr_count, 1);

        let codes = store.list_codes_by_event(&remote.id).await.unwrap();
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].event_id, remote.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_code_id_keeps_position() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let event = confirmed_event("evt-1", "Expo");
        store.put_event(&event).await.unwrap();
        let first = ScannedCode::new_local("evt-1", "first", 1);
        let second = ScannedCode::new_local("evt-1", "second", 2);
        store.put_code(&first).await.unwrap();
        store.put_code(&second).await.unwrap();

        let confirmed = ScannedCode {
            id: "code-1".to_string(),
            revision: 1,
            is_confirmed: true,
            ..first.clone()
        };
        store.replace_code_id(&first.id, &confirmed).await.unwrap();

        let codes = store.list_codes_by_event("evt-1").await.unwrap();
        assert_eq!(codes[0].id, "code-1");
        assert_eq!(codes[1].id, second.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_event_drops_unconfirmed_codes() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        store.put_event(&confirmed_event("evt-1", "Expo")).await.unwrap();
        let kept = ScannedCode {
            id: "code-1".to_string(),
            is_confirmed: true,
            ..ScannedCode::new_local("evt-1", "kept", 1)
        };
        let pending = ScannedCode::new_local("evt-1", "pending", 2);
        store.put_code(&kept).await.unwrap();
        store.put_code(&pending).await.unwrap();

        store.tombstone_event("evt-1").await.unwrap();
        assert!(store.restore_event("evt-1").await.unwrap());

        let codes = store.list_codes_by_event("evt-1").await.unwrap();
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].id, "code-1");
        let event = store.get_event("evt-1").await.unwrap().unwrap();
        assert_eq!(event.qr_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_codes_filters_processed() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        store.put_event(&confirmed_event("evt-1", "Expo")).await.unwrap();
        let done = ScannedCode {
            processed: true,
            category: Some("Website".to_string()),
            ..ScannedCode::new_local("evt-1", "https://example.com", 1)
        };
        store.put_code(&done).await.unwrap();
        store
            .put_code(&ScannedCode::new_local("evt-1", "raw", 2))
            .await
            .unwrap();

        let unprocessed = store
            .list_codes(&CodeFilter::for_event("evt-1").unprocessed())
            .await
            .unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].content, "raw");

        let fetched = store.get_code(&done.id).await.unwrap().unwrap();
        assert_eq!(fetched.category.as_deref(), Some("Website"));
    }
}
