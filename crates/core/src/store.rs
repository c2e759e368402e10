use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail};

use crate::ids::{OutingId, StudentId};
use crate::model::{OutingRequest, OutingStatus, StudentProfile};

/// Persistence for outing requests.
///
/// Writers never overwrite blindly: `compare_and_swap` commits only if the
/// stored version still equals `expected_version`, and stores the record with
/// `version = expected_version + 1`.
pub trait OutingStore: Send + Sync {
    fn insert(&self, request: &OutingRequest) -> anyhow::Result<()>;
    fn get(&self, id: &OutingId) -> anyhow::Result<Option<OutingRequest>>;

    /// Returns false if another writer got there first.
    fn compare_and_swap(&self, expected_version: u64, request: &OutingRequest) -> anyhow::Result<bool>;

    /// Oldest first.
    fn list_by_status(&self, status: OutingStatus) -> anyhow::Result<Vec<OutingRequest>>;
    /// Newest first.
    fn list_for_student(&self, student_id: &StudentId) -> anyhow::Result<Vec<OutingRequest>>;
}

/// Read side of the student directory, plus the sync hook that feeds it.
pub trait StudentDirectory: Send + Sync {
    fn student(&self, id: &StudentId) -> anyhow::Result<Option<StudentProfile>>;
    fn upsert_student(&self, profile: &StudentProfile) -> anyhow::Result<()>;
}

/// In-memory storage for tests and single-process demos. Not durable.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<OutingId, OutingRequest>,
    students: HashMap<StudentId, StudentProfile>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl OutingStore for InMemoryStore {
    fn insert(&self, request: &OutingRequest) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        if inner.requests.contains_key(&request.id) {
            bail!("outing request {} already exists", request.id);
        }
        inner.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn get(&self, id: &OutingId) -> anyhow::Result<Option<OutingRequest>> {
        Ok(self.lock()?.requests.get(id).cloned())
    }

    fn compare_and_swap(&self, expected_version: u64, request: &OutingRequest) -> anyhow::Result<bool> {
        let mut inner = self.lock()?;
        let Some(current) = inner.requests.get_mut(&request.id) else {
            bail!("outing request {} does not exist", request.id);
        };
        if current.version != expected_version {
            return Ok(false);
        }
        let mut next = request.clone();
        next.version = expected_version + 1;
        *current = next;
        Ok(true)
    }

    fn list_by_status(&self, status: OutingStatus) -> anyhow::Result<Vec<OutingRequest>> {
        let inner = self.lock()?;
        let mut out: Vec<_> = inner.requests.values().filter(|r| r.status == status).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn list_for_student(&self, student_id: &StudentId) -> anyhow::Result<Vec<OutingRequest>> {
        let inner = self.lock()?;
        let mut out: Vec<_> = inner
            .requests
            .values()
            .filter(|r| &r.student_id == student_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }
}

impl StudentDirectory for InMemoryStore {
    fn student(&self, id: &StudentId) -> anyhow::Result<Option<StudentProfile>> {
        Ok(self.lock()?.students.get(id).cloned())
    }

    fn upsert_student(&self, profile: &StudentProfile) -> anyhow::Result<()> {
        self.lock()?.students.insert(profile.id.clone(), profile.clone());
        Ok(())
    }
}
