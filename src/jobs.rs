use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::mailer::JobResult;

#[derive(Debug, Clone)]
pub enum JobState {
    Pending,
    Completed(JobResult),
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub state: JobState,
    pub created_at: i64,
}

/// In-memory store of dispatch jobs, keyed by the id handed back to the
/// caller. Records expire after the configured TTL whether or not they
/// completed.
#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
    ttl_seconds: i64,
}

impl JobStore {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            ttl_seconds,
        }
    }

    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let record = JobRecord {
            state: JobState::Pending,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.jobs.write().await.insert(id, record);
        id
    }

    pub async fn complete(&self, id: Uuid, result: JobResult) {
        if let Some(record) = self.jobs.write().await.get_mut(&id) {
            record.state = JobState::Completed(result);
        }
    }

    pub async fn fail(&self, id: Uuid) {
        if let Some(record) = self.jobs.write().await.get_mut(&id) {
            record.state = JobState::Failed;
        }
    }

    pub async fn get(&self, id: &Uuid) -> Option<JobRecord> {
        let cutoff = chrono::Utc::now().timestamp() - self.ttl_seconds;
        self.jobs
            .read()
            .await
            .get(id)
            .filter(|record| record.created_at > cutoff)
            .cloned()
    }

    pub async fn cleanup_expired(&self) {
        let cutoff = chrono::Utc::now().timestamp() - self.ttl_seconds;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| record.created_at > cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!("Removed {} expired job records", removed);
        }
    }
}

pub fn start_periodic_cleanup(store: JobStore, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));

        loop {
            interval.tick().await;
            store.cleanup_expired().await;
        }
    });
}
