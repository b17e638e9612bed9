use honeywalk_scanner::object::{AttributeValue, ObjectData};
use honeywalk_scanner::store::ObjectStore;
use honeywalk_scanner::StoreError;
use rusqlite::{Connection, OptionalExtension, Result, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct Database {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: u64,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub seed_urls: Vec<String>,
    pub configuration: Option<String>,
}

/// A row of `objects` or `new_objects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: u64,
    pub parent: Option<u64>,
    pub attributes: ObjectData,
}

impl StoredObject {
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(AttributeValue::as_str)
    }
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parent_of(data: &ObjectData) -> Option<i64> {
    match data.get("parent") {
        Some(AttributeValue::Object(id)) => Some(*id as i64),
        _ => None,
    }
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Several crawl tasks write through the same handle
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            -- Crawl jobs
            CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
    seed_urls TEXT NOT NULL,  -- JSON array
    configuration TEXT        -- JSON crawl parameters used
);

-- Content blobs and JSON records (requests, cookies, file lists, scripts)
CREATE TABLE IF NOT EXISTS blobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    data BLOB NOT NULL,
    FOREIGN KEY(job_id) REFERENCES jobs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_blobs_job ON blobs(job_id);

-- Crawl tree nodes
CREATE TABLE IF NOT EXISTS objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    parent_id INTEGER,
    attributes TEXT NOT NULL, -- JSON object of attributes
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY(job_id) REFERENCES jobs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_objects_job ON objects(job_id);
CREATE INDEX IF NOT EXISTS idx_objects_parent ON objects(parent_id);

-- Objects discovered for further analysis
CREATE TABLE IF NOT EXISTS new_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    parent_id INTEGER,
    attributes TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY(job_id) REFERENCES jobs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_new_objects_job ON new_objects(job_id);
            ",
        )?;
        Ok(())
    }

    // Job management
    pub fn create_job(&self, seed_urls: &[String], configuration: Option<&str>) -> Result<u64> {
        let seeds = serde_json::to_string(seed_urls)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO jobs (start_time, status, seed_urls, configuration) VALUES (?1, ?2, ?3, ?4)",
            params![current_timestamp(), JobStatus::Running.as_str(), seeds, configuration],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    pub fn finish_job(&self, job: u64, status: JobStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status.as_str(), current_timestamp(), job as i64],
        )?;
        Ok(())
    }

    pub fn job(&self, job: u64) -> Result<Option<JobInfo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, start_time, end_time, status, seed_urls, configuration FROM jobs WHERE id = ?1",
        )?;
        stmt.query_row(params![job as i64], |row| {
            let seeds: String = row.get(4)?;
            Ok(JobInfo {
                id: row.get::<_, i64>(0)? as u64,
                start_time: row.get(1)?,
                end_time: row.get(2)?,
                status: row.get(3)?,
                seed_urls: serde_json::from_str(&seeds).unwrap_or_default(),
                configuration: row.get(5)?,
            })
        })
        .optional()
    }

    pub fn latest_job(&self) -> Result<Option<u64>> {
        self.conn()
            .query_row("SELECT MAX(id) FROM jobs", [], |row| row.get::<_, Option<i64>>(0))
            .map(|id| id.map(|id| id as u64))
    }

    // Query methods
    pub fn objects_for_job(&self, job: u64) -> std::result::Result<Vec<StoredObject>, StoreError> {
        self.stored_rows("SELECT id, parent_id, attributes FROM objects WHERE job_id = ?1 ORDER BY id", job)
    }

    pub fn new_objects_for_job(&self, job: u64) -> std::result::Result<Vec<StoredObject>, StoreError> {
        self.stored_rows(
            "SELECT id, parent_id, attributes FROM new_objects WHERE job_id = ?1 ORDER BY id",
            job,
        )
    }

    fn stored_rows(&self, sql: &str, job: u64) -> std::result::Result<Vec<StoredObject>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(backend)?;
        let rows = stmt
            .query_map(params![job as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(id, parent, attributes)| -> std::result::Result<StoredObject, StoreError> {
                Ok(StoredObject {
                    id: id as u64,
                    parent: parent.map(|p| p as u64),
                    attributes: serde_json::from_str(&attributes)?,
                })
            })
            .collect()
    }

    pub fn blob_count(&self, job: u64) -> Result<usize> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM blobs WHERE job_id = ?1",
                params![job as i64],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as usize)
    }
}

impl ObjectStore for Database {
    fn save_blob(&self, job: u64, data: &[u8]) -> std::result::Result<u64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO blobs (job_id, data) VALUES (?1, ?2)",
            params![job as i64, data],
        )
        .map_err(backend)?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn load_blob(&self, job: u64, id: u64) -> std::result::Result<Vec<u8>, StoreError> {
        self.conn()
            .query_row(
                "SELECT data FROM blobs WHERE id = ?1 AND job_id = ?2",
                params![id as i64, job as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?
            .ok_or(StoreError::NotFound(id))
    }

    fn create_object(&self, job: u64, data: &ObjectData) -> std::result::Result<u64, StoreError> {
        let attributes = serde_json::to_string(data)?;
        let now = current_timestamp();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO objects (job_id, parent_id, attributes, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![job as i64, parent_of(data), attributes, now],
        )
        .map_err(backend)?;
        Ok(conn.last_insert_rowid() as u64)
    }

    /// Merges `data` into the stored attributes. An unknown id creates the row,
    /// which is how a root object handed in by id first lands in the table.
    fn update_object(&self, job: u64, id: u64, data: &ObjectData) -> std::result::Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(backend)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT attributes FROM objects WHERE id = ?1",
                params![id as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        let now = current_timestamp();

        match existing {
            Some(json) => {
                let mut merged: ObjectData = serde_json::from_str(&json)?;
                merged.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
                tx.execute(
                    "UPDATE objects SET attributes = ?1, parent_id = COALESCE(?2, parent_id), updated_at = ?3 WHERE id = ?4",
                    params![serde_json::to_string(&merged)?, parent_of(&merged), now, id as i64],
                )
                .map_err(backend)?;
            }
            None => {
                tx.execute(
                    "INSERT INTO objects (id, job_id, parent_id, attributes, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![id as i64, job as i64, parent_of(data), serde_json::to_string(data)?, now],
                )
                .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)
    }

    fn save_new_objects(&self, job: u64, objects: &[ObjectData]) -> std::result::Result<Vec<u64>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(backend)?;
        let now = current_timestamp();
        let mut ids = Vec::with_capacity(objects.len());
        for data in objects {
            tx.execute(
                "INSERT INTO new_objects (job_id, parent_id, attributes, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![job as i64, parent_of(data), serde_json::to_string(data)?, now],
            )
            .map_err(backend)?;
            ids.push(tx.last_insert_rowid() as u64);
        }
        tx.commit().map_err(backend)?;
        Ok(ids)
    }
}
