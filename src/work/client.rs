//! Admin operations over one queue namespace.
//!
//! The client never executes jobs. It reads the state the queue engine keeps in
//! Redis and performs the administrative edits the web UI offers: deleting or
//! re-enqueueing dead jobs.
//!
//! Every operation checks one connection out of the shared pool for its
//! duration. Edits that touch more than one key run as a Lua script so a dead
//! job is never both deleted and re-enqueued twice by concurrent callers.

use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::job::{
    now_epoch, page_bounds, DeadJob, Job, JobPage, Queue, RetryJob, ScheduledJob,
    WorkerObservation, WorkerPoolHeartbeat,
};
use super::keys::Keys;
use crate::error::WorkError;
use crate::pool::{PooledConnection, RedisConnector, RedisPool};

/// Number of dead jobs read per batch by [`Client::retry_all_dead_jobs`].
const RETRY_ALL_BATCH: isize = 1000;

/// Moves one dead job back onto its queue.
///
/// KEYS: dead set, job list, known jobs set.
/// ARGV: stored dead job, re-encoded job, job name.
const REQUEUE_DEAD_JOB_SCRIPT: &str = r#"
if redis.call('zrem', KEYS[1], ARGV[1]) == 1 then
  redis.call('lpush', KEYS[2], ARGV[2])
  redis.call('sadd', KEYS[3], ARGV[3])
  return 1
end
return 0
"#;

/// Read and admin access to the jobs of one namespace.
#[derive(Clone)]
pub struct Client {
    namespace: String,
    keys: Keys,
    pool: RedisPool,
}

impl Client {
    /// Creates a client for `namespace`, drawing connections from `pool`.
    pub fn new(namespace: impl Into<String>, pool: RedisPool) -> Self {
        let namespace = namespace.into();
        Self {
            keys: Keys::new(&namespace),
            namespace,
            pool,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Returns every known job name with its pending count and latency,
    /// sorted by job name.
    pub async fn queues(&self) -> Result<Vec<Queue>, WorkError> {
        let mut guard = self.pool.get().await?;
        let result: Result<_, WorkError> = async {
            let conn: &mut MultiplexedConnection = &mut guard;

            let mut names: Vec<String> = conn.smembers(self.keys.known_jobs()).await?;
            if names.is_empty() {
                return Ok((names, Vec::new(), Vec::new()));
            }
            names.sort();

            let mut pipe = redis::pipe();
            for name in &names {
                pipe.llen(self.keys.jobs(name));
            }
            let counts: Vec<i64> = pipe.query_async(conn).await?;

            // The oldest pending job sits at the tail of the list.
            let mut pipe = redis::pipe();
            for name in &names {
                pipe.lindex(self.keys.jobs(name), -1);
            }
            let oldest: Vec<Option<String>> = pipe.query_async(conn).await?;
            Ok((names, counts, oldest))
        }
        .await;
        let (names, counts, oldest) = settle(&mut guard, result)?;

        let now = now_epoch();
        let queues = names
            .into_iter()
            .zip(counts)
            .zip(oldest)
            .map(|((job_name, count), oldest)| {
                let latency = oldest
                    .and_then(|data| match Job::from_json(&data) {
                        Ok(job) => Some(job.latency_at(now)),
                        Err(e) => {
                            warn!(job_name = %job_name, error = %e, "Unreadable pending job");
                            None
                        }
                    })
                    .unwrap_or(0);
                Queue {
                    job_name,
                    count,
                    latency,
                }
            })
            .collect();

        Ok(queues)
    }

    /// Returns the heartbeats of all registered worker pools, sorted by id.
    /// Pools whose heartbeat hash has expired are omitted.
    pub async fn worker_pool_heartbeats(&self) -> Result<Vec<WorkerPoolHeartbeat>, WorkError> {
        let mut guard = self.pool.get().await?;
        let result: Result<_, WorkError> = async {
            let conn: &mut MultiplexedConnection = &mut guard;

            let mut ids: Vec<String> = conn.smembers(self.keys.worker_pools()).await?;
            if ids.is_empty() {
                return Ok((ids, Vec::new()));
            }
            ids.sort();

            let mut pipe = redis::pipe();
            for id in &ids {
                pipe.hgetall(self.keys.heartbeat(id));
            }
            let hashes: Vec<HashMap<String, String>> = pipe.query_async(conn).await?;
            Ok((ids, hashes))
        }
        .await;
        let (ids, hashes) = settle(&mut guard, result)?;

        Ok(ids
            .iter()
            .zip(hashes)
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(id, fields)| WorkerPoolHeartbeat::from_fields(id, &fields))
            .collect())
    }

    /// Returns what every busy worker of every live pool is running.
    pub async fn busy_workers(&self) -> Result<Vec<WorkerObservation>, WorkError> {
        let heartbeats = self.worker_pool_heartbeats().await?;
        let mut worker_ids: Vec<String> = heartbeats
            .into_iter()
            .flat_map(|hb| hb.worker_ids)
            .collect();
        if worker_ids.is_empty() {
            return Ok(Vec::new());
        }
        worker_ids.sort();
        worker_ids.dedup();

        let mut guard = self.pool.get().await?;
        let mut pipe = redis::pipe();
        for id in &worker_ids {
            pipe.hgetall(self.keys.worker_observation(id));
        }
        let conn: &mut MultiplexedConnection = &mut guard;
        let result = pipe.query_async(conn).await.map_err(WorkError::from);
        let hashes: Vec<HashMap<String, String>> = settle(&mut guard, result)?;

        Ok(worker_ids
            .iter()
            .zip(hashes)
            .map(|(id, fields)| WorkerObservation::from_fields(id, &fields))
            .filter(|obs| obs.is_busy)
            .collect())
    }

    /// Returns one page of jobs waiting to be retried, earliest first.
    pub async fn retry_jobs(&self, page: u32) -> Result<JobPage<RetryJob>, WorkError> {
        let (count, jobs) = self.sorted_jobs_page(&self.keys.retry(), page).await?;
        Ok(JobPage {
            count,
            jobs: jobs
                .into_iter()
                .map(|(job, retry_at)| RetryJob { retry_at, job })
                .collect(),
        })
    }

    /// Returns one page of scheduled jobs, earliest first.
    pub async fn scheduled_jobs(&self, page: u32) -> Result<JobPage<ScheduledJob>, WorkError> {
        let (count, jobs) = self.sorted_jobs_page(&self.keys.scheduled(), page).await?;
        Ok(JobPage {
            count,
            jobs: jobs
                .into_iter()
                .map(|(job, run_at)| ScheduledJob { run_at, job })
                .collect(),
        })
    }

    /// Returns one page of dead jobs, oldest death first.
    pub async fn dead_jobs(&self, page: u32) -> Result<JobPage<DeadJob>, WorkError> {
        let (count, jobs) = self.sorted_jobs_page(&self.keys.dead(), page).await?;
        Ok(JobPage {
            count,
            jobs: jobs
                .into_iter()
                .map(|(job, died_at)| DeadJob { died_at, job })
                .collect(),
        })
    }

    /// Deletes one dead job.
    ///
    /// # Errors
    ///
    /// Returns `WorkError::JobNotFound` if no dead job with that id died at
    /// `died_at`.
    pub async fn delete_dead_job(&self, died_at: i64, job_id: &str) -> Result<(), WorkError> {
        let mut guard = self.pool.get().await?;
        let result: Result<_, WorkError> = async {
            let conn: &mut MultiplexedConnection = &mut guard;
            let (raw, _) = self.find_dead_job(conn, died_at, job_id).await?;
            let removed: i64 = conn.zrem(self.keys.dead(), &raw).await?;
            Ok(removed)
        }
        .await;
        if settle(&mut guard, result)? == 0 {
            return Err(not_found(died_at, job_id));
        }

        info!(namespace = %self.namespace, job_id = %job_id, "Deleted dead job");
        Ok(())
    }

    /// Moves one dead job back onto its queue with its failures cleared and
    /// its enqueue time reset.
    ///
    /// # Errors
    ///
    /// Returns `WorkError::JobNotFound` if no dead job with that id died at
    /// `died_at`, including when another caller requeued it first.
    pub async fn retry_dead_job(&self, died_at: i64, job_id: &str) -> Result<(), WorkError> {
        let mut guard = self.pool.get().await?;
        let result: Result<_, WorkError> = async {
            let conn: &mut MultiplexedConnection = &mut guard;
            let (raw, job) = self.find_dead_job(conn, died_at, job_id).await?;
            self.requeue_dead_job(conn, &raw, job).await
        }
        .await;
        if !settle(&mut guard, result)? {
            return Err(not_found(died_at, job_id));
        }

        info!(namespace = %self.namespace, job_id = %job_id, "Requeued dead job");
        Ok(())
    }

    /// Deletes every dead job.
    pub async fn delete_all_dead_jobs(&self) -> Result<(), WorkError> {
        let mut guard = self.pool.get().await?;
        let conn: &mut MultiplexedConnection = &mut guard;
        let result = conn
            .del::<_, ()>(self.keys.dead())
            .await
            .map_err(WorkError::from);
        settle(&mut guard, result)?;

        info!(namespace = %self.namespace, "Deleted all dead jobs");
        Ok(())
    }

    /// Requeues every dead job, reading them in batches. Entries that cannot
    /// be parsed are left in place. Returns the number of jobs requeued.
    pub async fn retry_all_dead_jobs(&self) -> Result<usize, WorkError> {
        let mut guard = self.pool.get().await?;
        let result: Result<_, WorkError> = async {
            let conn: &mut MultiplexedConnection = &mut guard;

            let dead_key = self.keys.dead();
            let mut skipped: isize = 0;
            let mut requeued = 0;

            loop {
                let batch: Vec<String> = conn
                    .zrange(&dead_key, skipped, skipped + RETRY_ALL_BATCH - 1)
                    .await?;
                if batch.is_empty() {
                    break;
                }

                for raw in batch {
                    match Job::from_json(&raw) {
                        Ok(job) => {
                            if self.requeue_dead_job(conn, &raw, job).await? {
                                requeued += 1;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping unreadable dead job");
                            skipped += 1;
                        }
                    }
                }
            }
            Ok((requeued, skipped))
        }
        .await;
        let (requeued, skipped) = settle(&mut guard, result)?;

        info!(namespace = %self.namespace, requeued, skipped, "Requeued all dead jobs");
        Ok(requeued)
    }

    /// Reads the total size of a sorted set and one page of its members with
    /// their scores.
    async fn sorted_jobs_page(
        &self,
        key: &str,
        page: u32,
    ) -> Result<(i64, Vec<(Job, i64)>), WorkError> {
        let mut guard = self.pool.get().await?;
        let (start, stop) = page_bounds(page);
        let result: Result<_, WorkError> = async {
            let conn: &mut MultiplexedConnection = &mut guard;
            let count: i64 = conn.zcard(key).await?;
            let members: Vec<(String, f64)> = conn.zrange_withscores(key, start, stop).await?;
            Ok((count, members))
        }
        .await;
        let (count, members) = settle(&mut guard, result)?;

        let mut jobs = Vec::with_capacity(members.len());
        for (data, score) in members {
            match Job::from_json(&data) {
                Ok(job) => jobs.push((job, score as i64)),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable job"),
            }
        }

        debug!(key = %key, page, count, returned = jobs.len(), "Read job page");
        Ok((count, jobs))
    }

    /// Finds a dead job by death time and id, returning the stored member
    /// verbatim alongside the parsed job.
    async fn find_dead_job(
        &self,
        conn: &mut MultiplexedConnection,
        died_at: i64,
        job_id: &str,
    ) -> Result<(String, Job), WorkError> {
        let members: Vec<String> = conn
            .zrangebyscore(self.keys.dead(), died_at, died_at)
            .await?;

        members
            .into_iter()
            .find_map(|raw| match Job::from_json(&raw) {
                Ok(job) if job.id == job_id => Some((raw, job)),
                _ => None,
            })
            .ok_or_else(|| not_found(died_at, job_id))
    }

    /// Atomically removes `raw` from the dead set and pushes the job back
    /// onto its queue with a fresh enqueue time. Returns `false` if `raw` was
    /// no longer dead.
    async fn requeue_dead_job(
        &self,
        conn: &mut MultiplexedConnection,
        raw: &str,
        mut job: Job,
    ) -> Result<bool, WorkError> {
        job.reset_failures();
        job.enqueued_at = now_epoch();
        let payload = serde_json::to_string(&job)?;

        let moved: i64 = redis::Script::new(REQUEUE_DEAD_JOB_SCRIPT)
            .key(self.keys.dead())
            .key(self.keys.jobs(&job.name))
            .key(self.keys.known_jobs())
            .arg(raw)
            .arg(payload)
            .arg(&job.name)
            .invoke_async(conn)
            .await?;

        Ok(moved == 1)
    }
}

/// Passes `result` through, marking the connection broken when the failure
/// came from the transport so it is not handed out again.
fn settle<T>(
    conn: &mut PooledConnection<RedisConnector>,
    result: Result<T, WorkError>,
) -> Result<T, WorkError> {
    if let Err(WorkError::Redis(e)) = &result {
        if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
            warn!(error = %e, "Discarding broken Redis connection");
            conn.mark_broken();
        }
    }
    result
}

fn not_found(died_at: i64, job_id: &str) -> WorkError {
    WorkError::JobNotFound {
        died_at,
        job_id: job_id.to_string(),
    }
}
