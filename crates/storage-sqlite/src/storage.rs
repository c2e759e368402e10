use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use outing_core::{
    now_ms, OutingId, OutingRequest, OutingStatus, OutingStore, StudentDirectory, StudentId,
    StudentProfile,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory sqlite db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn decode(body_json: &str, version: i64) -> Result<OutingRequest> {
        let mut req: OutingRequest = serde_json::from_str(body_json).context("decode outing request body")?;
        // the column is authoritative
        req.version = version as u64;
        Ok(req)
    }

    fn query_requests(&self, sql: &str, arg: &str) -> Result<Vec<OutingRequest>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([arg], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        let mut out = vec![];
        for row in rows {
            let (body, version) = row?;
            out.push(Self::decode(&body, version)?);
        }
        Ok(out)
    }
}

impl OutingStore for SqliteStore {
    fn insert(&self, request: &OutingRequest) -> Result<()> {
        let conn = self.lock()?;
        let body = serde_json::to_string(request).context("encode outing request body")?;
        conn.execute(
            "INSERT INTO outing_requests(id, student_id, status, version, created_at, updated_at, body_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                request.id.as_str(),
                request.student_id.as_str(),
                request.status.as_str(),
                request.version as i64,
                request.created_at,
                now_ms(),
                body
            ],
        )
        .with_context(|| format!("insert outing request {}", request.id))?;
        Ok(())
    }

    fn get(&self, id: &OutingId) -> Result<Option<OutingRequest>> {
        let conn = self.lock()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT body_json, version FROM outing_requests WHERE id = ?1",
                params![id.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        row.map(|(body, version)| Self::decode(&body, version)).transpose()
    }

    fn compare_and_swap(&self, expected_version: u64, request: &OutingRequest) -> Result<bool> {
        let conn = self.lock()?;
        let next_version = expected_version + 1;
        let mut stored = request.clone();
        stored.version = next_version;
        let body = serde_json::to_string(&stored).context("encode outing request body")?;

        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE outing_requests
             SET status = ?1, version = ?2, updated_at = ?3, body_json = ?4
             WHERE id = ?5 AND version = ?6",
            params![
                stored.status.as_str(),
                next_version as i64,
                now_ms(),
                body,
                stored.id.as_str(),
                expected_version as i64
            ],
        )?;
        if changed == 0 {
            let exists: i64 = tx.query_row(
                "SELECT COUNT(1) FROM outing_requests WHERE id = ?1",
                params![stored.id.as_str()],
                |r| r.get(0),
            )?;
            tx.commit()?;
            if exists == 0 {
                bail!("outing request {} does not exist", stored.id);
            }
            debug!(request_id = %stored.id, expected_version, "stale version; swap refused");
            return Ok(false);
        }
        tx.commit()?;
        Ok(true)
    }

    fn list_by_status(&self, status: OutingStatus) -> Result<Vec<OutingRequest>> {
        self.query_requests(
            "SELECT body_json, version FROM outing_requests WHERE status = ?1 ORDER BY created_at ASC, id ASC",
            status.as_str(),
        )
    }

    fn list_for_student(&self, student_id: &StudentId) -> Result<Vec<OutingRequest>> {
        self.query_requests(
            "SELECT body_json, version FROM outing_requests WHERE student_id = ?1 ORDER BY created_at DESC, id DESC",
            student_id.as_str(),
        )
    }
}

impl StudentDirectory for SqliteStore {
    fn student(&self, id: &StudentId) -> Result<Option<StudentProfile>> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row("SELECT body_json FROM students WHERE id = ?1", params![id.as_str()], |r| r.get(0))
            .optional()?;
        body.map(|b| serde_json::from_str::<StudentProfile>(&b).context("decode student profile"))
            .transpose()
    }

    fn upsert_student(&self, profile: &StudentProfile) -> Result<()> {
        let conn = self.lock()?;
        let body = serde_json::to_string(profile).context("encode student profile")?;
        conn.execute(
            "INSERT INTO students(id, updated_at, body_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at, body_json = excluded.body_json",
            params![profile.id.as_str(), now_ms(), body],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use outing_core::NewOutingRequest;
    use tempfile::tempdir;

    fn request(student: &str, created_at: i64) -> OutingRequest {
        OutingRequest::new(
            StudentId::from_str(student),
            NewOutingRequest {
                outing_date: NaiveDate::from_ymd_opt(2026, 10, 30).unwrap(),
                outing_time: NaiveTime::from_hms_opt(7, 45, 0).unwrap(),
                return_time: NaiveTime::from_hms_opt(19, 15, 0).unwrap(),
                purpose: "railway station pickup".into(),
            },
            created_at,
        )
    }

    #[test]
    fn sqlite_open_and_migrate() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("outing.db");
        let _ = SqliteStore::open(&db_path).unwrap();
        // reopening re-applies the idempotent schema
        let _ = SqliteStore::open(&db_path).unwrap();
    }

    #[test]
    fn insert_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let req = request("s1", 10);
        store.insert(&req).unwrap();
        assert_eq!(store.get(&req.id).unwrap(), Some(req.clone()));
        assert!(store.insert(&req).is_err());
        assert!(store.get(&OutingId::from_str("nope")).unwrap().is_none());
    }

    #[test]
    fn compare_and_swap_is_exclusive() {
        let store = SqliteStore::open_in_memory().unwrap();
        let req = request("s1", 10);
        store.insert(&req).unwrap();

        let mut a = req.clone();
        a.status = OutingStatus::PendingHostelIncharge;
        a.approval_stage = 2;
        let mut b = req.clone();
        b.status = OutingStatus::Denied;

        assert!(store.compare_and_swap(0, &a).unwrap());
        assert!(!store.compare_and_swap(0, &b).unwrap());

        let stored = store.get(&req.id).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, OutingStatus::PendingHostelIncharge);
        assert_eq!(store.list_by_status(OutingStatus::PendingHostelIncharge).unwrap().len(), 1);
        assert!(store.list_by_status(OutingStatus::PendingFloorIncharge).unwrap().is_empty());
    }

    #[test]
    fn compare_and_swap_missing_row_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.compare_and_swap(0, &request("s1", 1)).is_err());
    }

    #[test]
    fn listing_orders() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (s, t) in [("s1", 30), ("s2", 10), ("s1", 20)] {
            store.insert(&request(s, t)).unwrap();
        }
        let queue: Vec<_> = store
            .list_by_status(OutingStatus::PendingFloorIncharge)
            .unwrap()
            .into_iter()
            .map(|r| r.created_at)
            .collect();
        assert_eq!(queue, vec![10, 20, 30]);

        let mine: Vec<_> = store
            .list_for_student(&StudentId::from_str("s1"))
            .unwrap()
            .into_iter()
            .map(|r| r.created_at)
            .collect();
        assert_eq!(mine, vec![30, 20]);
    }

    #[test]
    fn student_upsert_and_lookup() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("outing.db");
        let mut profile = StudentProfile {
            id: StudentId::from_str("21ME090"),
            name: "Meera".into(),
            roll_number: "21ME090".into(),
            phone: "9000000001".into(),
            parent_phone: "9000000002".into(),
            branch: "MECH".into(),
            room_number: "A-101".into(),
            hostel_block: Some("A".into()),
            floor: Some("1".into()),
        };
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.upsert_student(&profile).unwrap();
            profile.room_number = "A-117".into();
            store.upsert_student(&profile).unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.student(&profile.id).unwrap(), Some(profile));
        assert!(store.student(&StudentId::from_str("ghost")).unwrap().is_none());
    }
}
