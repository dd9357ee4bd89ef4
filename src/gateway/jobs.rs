//! Asynchronous generation job tracking.
//!
//! A caller submits a message, gets a job id back immediately, and polls
//! for the result while the generation runs in a background task. Results
//! are retained for a fixed window after completion, then purged; a purged
//! or never-existed id both poll as `expired`, by contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::gateway::RequesterInfo;

#[derive(Debug, Clone)]
enum JobState {
    Pending,
    Done {
        reply: String,
        completed_at: Instant,
    },
}

#[derive(Debug)]
struct JobEntry {
    metadata: RequesterInfo,
    created_at: Instant,
    state: JobState,
}

/// What a poller sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Done(String),
    Expired,
}

/// Admin-facing view of one tracked job.
#[derive(Debug, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub state: &'static str,
    pub age_secs: u64,
    pub ip: String,
    pub user_agent: String,
}

/// Process-local registry of generation jobs.
pub struct JobRegistry {
    jobs: DashMap<String, JobEntry>,
    seq: AtomicU64,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            seq: AtomicU64::new(0),
            retention,
        }
    }

    /// Record a fresh pending job and return its id without blocking.
    ///
    /// Ids combine a monotonic counter with a random suffix, so they stay
    /// unique under submission bursts that land on the same clock tick.
    pub fn submit(&self, metadata: RequesterInfo) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{:06x}-{}", seq, Uuid::new_v4().simple());
        self.jobs.insert(
            id.clone(),
            JobEntry {
                metadata,
                created_at: Instant::now(),
                state: JobState::Pending,
            },
        );
        id
    }

    /// Store the finished reply. Invoked once by the background generation
    /// task; the map write makes the transition visible atomically.
    pub fn complete(&self, job_id: &str, reply: String) {
        match self.jobs.get_mut(job_id) {
            Some(mut entry) => {
                entry.state = JobState::Done {
                    reply,
                    completed_at: Instant::now(),
                };
            }
            None => {
                // Job was purged before the generation finished. Nothing to do.
                tracing::debug!(job_id = %job_id, "Completion for unknown job dropped");
            }
        }
    }

    /// Read-only status check; never blocks.
    ///
    /// A done entry past its retention window is purged on sight, so the
    /// sweeper is a backstop rather than a correctness requirement.
    pub fn poll(&self, job_id: &str) -> JobStatus {
        let status = match self.jobs.get(job_id) {
            None => return JobStatus::Expired,
            Some(entry) => match &entry.state {
                JobState::Pending => JobStatus::Pending,
                JobState::Done {
                    reply,
                    completed_at,
                } => {
                    if completed_at.elapsed() >= self.retention {
                        JobStatus::Expired
                    } else {
                        JobStatus::Done(reply.clone())
                    }
                }
            },
        };

        if status == JobStatus::Expired {
            self.jobs.remove(job_id);
        }
        status
    }

    /// Purge every done job older than the retention window.
    pub fn sweep(&self) {
        let retention = self.retention;
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| match &entry.state {
            JobState::Pending => true,
            JobState::Done { completed_at, .. } => completed_at.elapsed() < retention,
        });
        let purged = before - self.jobs.len();
        if purged > 0 {
            tracing::debug!(purged, "Swept expired jobs");
        }
    }

    /// Snapshot all tracked jobs for admin inspection.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.jobs
            .iter()
            .map(|entry| JobSnapshot {
                id: entry.key().clone(),
                state: match entry.state {
                    JobState::Pending => "pending",
                    JobState::Done { .. } => "done",
                },
                age_secs: entry.created_at.elapsed().as_secs(),
                ip: entry.metadata.ip.clone(),
                user_agent: entry.metadata.user_agent.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Timer-driven purge loop. Runs until the registry is dropped elsewhere
/// and the process exits; there is no shutdown handshake to coordinate.
pub fn spawn_sweeper(
    registry: std::sync::Arc<JobRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            registry.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    const RETENTION: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn submit_then_poll_is_pending() {
        let registry = JobRegistry::new(RETENTION);
        let id = registry.submit(RequesterInfo::default());
        assert_eq!(registry.poll(&id), JobStatus::Pending);
    }

    #[tokio::test]
    async fn complete_makes_poll_done_with_exact_reply() {
        let registry = JobRegistry::new(RETENTION);
        let id = registry.submit(RequesterInfo::default());
        registry.complete(&id, "**Olá!** Tudo bem?".to_string());
        assert_eq!(
            registry.poll(&id),
            JobStatus::Done("**Olá!** Tudo bem?".to_string())
        );
        // Polling again keeps returning the result inside the window
        assert_eq!(
            registry.poll(&id),
            JobStatus::Done("**Olá!** Tudo bem?".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn done_job_expires_after_retention() {
        let registry = JobRegistry::new(RETENTION);
        let id = registry.submit(RequesterInfo::default());
        registry.complete(&id, "resposta".to_string());

        tokio::time::advance(RETENTION + Duration::from_secs(1)).await;

        assert_eq!(registry.poll(&id), JobStatus::Expired);
        // Purged on sight: the record is gone now
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_expired() {
        let registry = JobRegistry::new(RETENTION);
        assert_eq!(registry.poll("no-such-job"), JobStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_jobs_survive_retention() {
        let registry = JobRegistry::new(RETENTION);
        let id = registry.submit(RequesterInfo::default());

        tokio::time::advance(RETENTION * 3).await;

        // Only completion starts the retention clock
        assert_eq!(registry.poll(&id), JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_done_jobs() {
        let registry = Arc::new(JobRegistry::new(RETENTION));
        let done = registry.submit(RequesterInfo::default());
        registry.complete(&done, "feito".to_string());
        let pending = registry.submit(RequesterInfo::default());

        let handle = spawn_sweeper(registry.clone(), Duration::from_secs(30));

        tokio::time::advance(RETENTION + Duration::from_secs(31)).await;
        // Let the sweeper task run its tick
        tokio::task::yield_now().await;

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.poll(&pending), JobStatus::Pending);
        handle.abort();
    }

    #[tokio::test]
    async fn ids_unique_under_concurrent_submission() {
        let registry = Arc::new(JobRegistry::new(RETENTION));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                (0..200)
                    .map(|_| registry.submit(RequesterInfo::default()))
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate job id");
            }
        }
        assert_eq!(seen.len(), 1600);
    }
}
