//! SQLite-backed record store
//!
//! Documents live in a single table keyed by (collection, id) with the
//! payload as a JSON column, managed through Diesel with an r2d2 pool.
//! Writes made through this process fan out change batches directly;
//! writes made by other processes (the evaluation pipeline) are picked up
//! by watching the database file and diffing snapshots.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, Weak};

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::documents;

use super::{
    merge_document_fields, ChangeEvent, Document, RecordStore, Result, StoreError, StoreEvent,
    SubscriberHub, Subscription,
};

/// Insertable document row
#[derive(Insertable)]
#[diesel(table_name = documents)]
struct NewDocument<'a> {
    id: &'a str,
    collection: &'a str,
    fields: &'a str,
    created_at: &'a str,
    updated_at: &'a str,
}

/// Queryable document row
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = documents)]
struct DocumentRow {
    id: String,
    #[allow(dead_code)]
    collection: String,
    fields: String,
    #[allow(dead_code)]
    created_at: String,
    #[allow(dead_code)]
    updated_at: String,
}

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Walk up the directory tree to find a .garage folder (like git finds .git).
/// Can be overridden with the GARAGE_DB_PATH env var.
fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("GARAGE_DB_PATH") {
        return PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let garage_dir = dir.join(".garage");
            if garage_dir.exists() && garage_dir.is_dir() {
                return garage_dir.join("garage.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    PathBuf::from(".garage/garage.db")
}

/// Document store on embedded SQLite.
pub struct SqliteStore {
    pool: DbPool,
    path: PathBuf,
    hub: Arc<SubscriberHub>,
    /// Last observed state per collection, for file-watch diffing.
    snapshots: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl SqliteStore {
    /// The database path that will be used by [`open`](Self::open).
    pub fn db_path() -> PathBuf {
        get_db_path()
    }

    /// Open the store at the default path (respects GARAGE_DB_PATH).
    pub fn open() -> Result<Arc<Self>> {
        let path = get_db_path();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::open_at(&path)
    }

    /// Open the store at a specific path.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let manager =
            ConnectionManager::<SqliteConnection>::new(path.to_string_lossy().to_string());
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let store = Self {
            pool,
            path,
            hub: SubscriberHub::new(),
            snapshots: Mutex::new(HashMap::new()),
        };
        store.init_schema()?;
        Ok(Arc::new(store))
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT NOT NULL,
                collection TEXT NOT NULL,
                fields TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
        "#,
        )
        .execute(&mut conn)
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
        )
        .execute(&mut conn)
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    /// Insert a document under a caller-chosen id (seeding, imports).
    pub fn insert_with_id(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        if !fields.is_object() {
            return Err(StoreError::Validation(
                "Document fields must be a JSON object".to_string(),
            ));
        }
        let mut conn = self.get_conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let serialized = fields.to_string();

        let row = NewDocument {
            id,
            collection,
            fields: &serialized,
            created_at: &now,
            updated_at: &now,
        };
        diesel::insert_into(documents::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        drop(conn);

        self.note_local_change(collection, id, Some(&fields));
        self.hub
            .publish(collection, vec![ChangeEvent::added(id, fields)]);
        Ok(())
    }

    /// Delete a document, emitting a `removed` event when it existed.
    pub fn remove(&self, collection: &str, id: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(
            documents::table
                .filter(documents::collection.eq(collection))
                .filter(documents::id.eq(id)),
        )
        .execute(&mut conn)
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        drop(conn);

        if deleted == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.note_local_change(collection, id, None);
        self.hub.publish(collection, vec![ChangeEvent::removed(id)]);
        Ok(())
    }

    fn load_collection(&self, collection: &str) -> Result<Vec<DocumentRow>> {
        let mut conn = self.get_conn()?;
        documents::table
            .filter(documents::collection.eq(collection))
            .order((documents::created_at.asc(), documents::id.asc()))
            .load::<DocumentRow>(&mut conn)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn snapshot(&self, collection: &str) -> Result<BTreeMap<String, Value>> {
        let rows = self.load_collection(collection)?;
        let mut snapshot = BTreeMap::new();
        for row in rows {
            match serde_json::from_str(&row.fields) {
                Ok(fields) => {
                    snapshot.insert(row.id, fields);
                }
                Err(e) => log::warn!("skipping undecodable document {}: {}", row.id, e),
            }
        }
        Ok(snapshot)
    }

    /// Keep the diff baseline in step with our own writes so the file
    /// watcher does not re-announce them.
    fn note_local_change(&self, collection: &str, id: &str, fields: Option<&Value>) {
        let mut snapshots = self.snapshots.lock().expect("snapshot lock");
        if let Some(snapshot) = snapshots.get_mut(collection) {
            match fields {
                Some(fields) => {
                    snapshot.insert(id.to_string(), fields.clone());
                }
                None => {
                    snapshot.remove(id);
                }
            }
        }
    }

    /// Re-read every watched collection and publish whatever changed
    /// underneath us. Called by the file watcher; also usable directly
    /// when polling is preferable.
    pub fn resync(&self) {
        for collection in self.hub.active_collections() {
            let fresh = match self.snapshot(&collection) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("resync of {} failed: {}", collection, e);
                    self.hub.publish_error(&collection, &e.to_string());
                    continue;
                }
            };
            let events = {
                let mut snapshots = self.snapshots.lock().expect("snapshot lock");
                let baseline = snapshots.entry(collection.clone()).or_default();
                let events = diff_snapshots(baseline, &fresh);
                *baseline = fresh;
                events
            };
            self.hub.publish(&collection, events);
        }
    }

    /// Watch the database file so changes written by other processes
    /// surface as change batches. The returned watcher must be kept alive
    /// for as long as delivery is wanted.
    pub fn start_watcher(self: &Arc<Self>) -> Result<RecommendedWatcher> {
        let weak: Weak<SqliteStore> = Arc::downgrade(self);
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if event.kind.is_modify() || event.kind.is_create() {
                        if let Some(store) = weak.upgrade() {
                            store.resync();
                        }
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(watcher)
    }
}

impl RecordStore for SqliteStore {
    fn fetch_all(&self, collection: &str) -> Vec<Document> {
        match self.load_collection(collection) {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| match serde_json::from_str(&row.fields) {
                    Ok(fields) => Some(Document { id: row.id, fields }),
                    Err(e) => {
                        log::warn!("skipping undecodable document {}: {}", row.id, e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                log::warn!("fetch_all({}) degraded to empty: {}", collection, e);
                Vec::new()
            }
        }
    }

    fn fetch_by_id(&self, collection: &str, id: &str) -> Option<Document> {
        let mut conn = match self.get_conn() {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("fetch_by_id({}, {}) degraded to None: {}", collection, id, e);
                return None;
            }
        };
        let row = documents::table
            .filter(documents::collection.eq(collection))
            .filter(documents::id.eq(id))
            .first::<DocumentRow>(&mut conn)
            .optional()
            .unwrap_or_else(|e| {
                log::warn!("fetch_by_id({}, {}) degraded to None: {}", collection, id, e);
                None
            })?;
        match serde_json::from_str(&row.fields) {
            Ok(fields) => Some(Document { id: row.id, fields }),
            Err(e) => {
                log::warn!("undecodable document {}: {}", row.id, e);
                None
            }
        }
    }

    fn add(&self, collection: &str, fields: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.insert_with_id(collection, &id, fields)?;
        Ok(id)
    }

    fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let mut conn = self.get_conn()?;
        let row = documents::table
            .filter(documents::collection.eq(collection))
            .filter(documents::id.eq(id))
            .first::<DocumentRow>(&mut conn)
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut fields: Value = serde_json::from_str(&row.fields)
            .map_err(|e| StoreError::Backend(format!("corrupt document {}: {}", id, e)))?;
        merge_document_fields(&mut fields, &patch);

        let now = chrono::Utc::now().to_rfc3339();
        diesel::update(
            documents::table
                .filter(documents::collection.eq(collection))
                .filter(documents::id.eq(id)),
        )
        .set((
            documents::fields.eq(fields.to_string()),
            documents::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        drop(conn);

        self.note_local_change(collection, id, Some(&fields));
        self.hub
            .publish(collection, vec![ChangeEvent::modified(id, fields)]);
        Ok(())
    }

    fn subscribe(&self, collection: &str) -> (Subscription, Receiver<StoreEvent>) {
        // Prime the diff baseline so the watcher only reports changes made
        // after this point.
        {
            let mut snapshots = self.snapshots.lock().expect("snapshot lock");
            if !snapshots.contains_key(collection) {
                let snapshot = self.snapshot(collection).unwrap_or_else(|e| {
                    log::warn!("priming snapshot of {} failed: {}", collection, e);
                    BTreeMap::new()
                });
                snapshots.insert(collection.to_string(), snapshot);
            }
        }
        self.hub.subscribe(collection)
    }
}

/// Compute the change batch that turns `old` into `new`.
///
/// Additions and modifications come out in id order, removals last; the
/// per-id last-event-wins contract is all consumers may rely on.
pub(crate) fn diff_snapshots(
    old: &BTreeMap<String, Value>,
    new: &BTreeMap<String, Value>,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (id, fields) in new {
        match old.get(id) {
            None => events.push(ChangeEvent::added(id.clone(), fields.clone())),
            Some(previous) if previous != fields => {
                events.push(ChangeEvent::modified(id.clone(), fields.clone()));
            }
            Some(_) => {}
        }
    }
    for id in old.keys() {
        if !new.contains_key(id) {
            events.push(ChangeEvent::removed(id.clone()));
        }
    }
    events
}
