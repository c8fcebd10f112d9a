//! Background queue of catalog scans.
//!
//! Jobs travel over an unbounded channel to a fixed pool of worker tasks. Job states live in
//! a shared table so they can be listed, polled and cancelled while the workers run. Only the
//! most recent terminal jobs are kept in that table.

mod scanner;

pub use scanner::{CatalogDefinitionScanner, CatalogScanner, ConnectionInfo};

use std::{fmt::Display, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{catalog::SourceId, config::ScanConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanJobId(Uuid);

impl ScanJobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ScanJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScanJobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanJobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl ScanJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanJobStatus::Finished | ScanJobStatus::Failed | ScanJobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanJob {
    pub id: ScanJobId,
    pub status: ScanJobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanQueueError {
    NotFound(ScanJobId),
    AlreadyTerminal { id: ScanJobId, status: ScanJobStatus },
    /// The queue was shut down.
    Closed,
}

impl Display for ScanQueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanQueueError::NotFound(id) => write!(f, "Scan job {} not found.", id),
            ScanQueueError::AlreadyTerminal { id, status } => {
                write!(f, "Scan job {} is already {} and cannot be cancelled.", id, status)
            }
            ScanQueueError::Closed => write!(f, "Scan queue is closed."),
        }
    }
}

impl std::error::Error for ScanQueueError {}

struct ScanTask {
    id: ScanJobId,
    connection: ConnectionInfo,
    source_id: SourceId,
}

type JobTable = Arc<RwLock<IndexMap<ScanJobId, ScanJobStatus>>>;

pub struct ScanQueue {
    sender: Option<mpsc::UnboundedSender<ScanTask>>,
    jobs: JobTable,
    retained_jobs: usize,
    workers: Vec<JoinHandle<()>>,
}

impl ScanQueue {
    /// Spawns `workers` worker tasks (at least one) on the current tokio runtime.
    pub fn start(workers: usize, scanner: Arc<dyn CatalogScanner>) -> Self {
        let config = ScanConfig {
            workers,
            ..ScanConfig::default()
        };
        Self::from_config(&config, scanner)
    }

    pub fn from_config(config: &ScanConfig, scanner: Arc<dyn CatalogScanner>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let jobs: JobTable = Arc::new(RwLock::new(IndexMap::new()));
        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    jobs.clone(),
                    config.retained_jobs,
                    scanner.clone(),
                ))
            })
            .collect();
        Self {
            sender: Some(sender),
            jobs,
            retained_jobs: config.retained_jobs,
            workers,
        }
    }

    pub fn enqueue(
        &self,
        connection: ConnectionInfo,
        source_id: SourceId,
    ) -> Result<ScanJob, ScanQueueError> {
        let sender = self.sender.as_ref().ok_or(ScanQueueError::Closed)?;
        let id = ScanJobId::new();
        self.jobs.write().insert(id, ScanJobStatus::Queued);
        let task = ScanTask {
            id,
            connection,
            source_id,
        };
        if sender.send(task).is_err() {
            self.jobs.write().shift_remove(&id);
            return Err(ScanQueueError::Closed);
        }
        log::info!("Queued scan job {} for source {}.", id, source_id);
        Ok(ScanJob {
            id,
            status: ScanJobStatus::Queued,
        })
    }

    /// Started, then finished, then failed jobs, each group in enqueue order.
    ///
    /// Queued and cancelled jobs are not listed.
    pub fn list_jobs(&self) -> Vec<ScanJob> {
        let jobs = self.jobs.read();
        [
            ScanJobStatus::Started,
            ScanJobStatus::Finished,
            ScanJobStatus::Failed,
        ]
        .into_iter()
        .flat_map(|wanted| {
            jobs.iter()
                .filter(move |(_, status)| **status == wanted)
                .map(|(id, status)| ScanJob {
                    id: *id,
                    status: *status,
                })
        })
        .collect()
    }

    pub fn get_status(&self, id: ScanJobId) -> Result<ScanJobStatus, ScanQueueError> {
        self.jobs
            .read()
            .get(&id)
            .copied()
            .ok_or(ScanQueueError::NotFound(id))
    }

    pub fn cancel(&self, id: ScanJobId) -> Result<(), ScanQueueError> {
        let mut jobs = self.jobs.write();
        let status = jobs.get_mut(&id).ok_or(ScanQueueError::NotFound(id))?;
        if status.is_terminal() {
            return Err(ScanQueueError::AlreadyTerminal {
                id,
                status: *status,
            });
        }
        *status = ScanJobStatus::Cancelled;
        log::info!("Cancelled scan job {}.", id);
        prune_terminal(&mut jobs, self.retained_jobs);
        Ok(())
    }

    /// Closes the queue and waits for the workers to drain the jobs already queued.
    pub async fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                log::warn!("Scan worker ended abnormally: {}", err);
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<ScanTask>>>,
    jobs: JobTable,
    retained_jobs: usize,
    scanner: Arc<dyn CatalogScanner>,
) {
    loop {
        let task = receiver.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };

        if !start_job(&jobs, task.id) {
            log::info!("Worker {} skipping cancelled scan job {}.", worker_id, task.id);
            continue;
        }
        log::info!(
            "Worker {} started scan job {} for source {}.",
            worker_id,
            task.id,
            task.source_id
        );

        // A panicking scanner fails its job instead of taking the worker down.
        let scan = {
            let scanner = scanner.clone();
            let connection = task.connection;
            let source_id = task.source_id;
            tokio::spawn(async move { scanner.scan(&connection, source_id).await })
        };
        let result = match scan.await {
            Ok(result) => result,
            Err(err) => Err(anyhow::anyhow!("Scan task aborted: {}", err)),
        };

        let mut table = jobs.write();
        let Some(status) = table.get_mut(&task.id) else {
            continue;
        };
        if *status != ScanJobStatus::Started {
            log::info!("Scan job {} was {} while running.", task.id, status);
            continue;
        }
        *status = match result {
            Ok(()) => ScanJobStatus::Finished,
            Err(err) => {
                log::warn!("Scan job {} failed: {:#}", task.id, err);
                ScanJobStatus::Failed
            }
        };
        log::info!("Scan job {} {}.", task.id, status);
        prune_terminal(&mut table, retained_jobs);
    }
    log::debug!("Scan worker {} stopped.", worker_id);
}

/// Forgets the oldest terminal jobs (in enqueue order) beyond the `retained` most recent.
fn prune_terminal(table: &mut IndexMap<ScanJobId, ScanJobStatus>, retained: usize) {
    let terminal = table.values().filter(|status| status.is_terminal()).count();
    let mut excess = terminal.saturating_sub(retained);
    if excess == 0 {
        return;
    }
    log::debug!("Forgetting {} terminal scan jobs.", excess);
    table.retain(|_, status| {
        if excess > 0 && status.is_terminal() {
            excess -= 1;
            return false;
        }
        true
    });
}

/// Moves a queued job to STARTED; false if it was cancelled meanwhile.
fn start_job(jobs: &JobTable, id: ScanJobId) -> bool {
    let mut table = jobs.write();
    match table.get_mut(&id) {
        Some(status) if *status == ScanJobStatus::Queued => {
            *status = ScanJobStatus::Started;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(ScanJobStatus::Finished.to_string(), "finished");
        assert_eq!(
            ScanJobStatus::from_str("cancelled").unwrap(),
            ScanJobStatus::Cancelled
        );
        assert_eq!(
            serde_json::to_string(&ScanJobStatus::Started).unwrap(),
            "\"started\""
        );
    }

    #[test]
    fn test_prune_keeps_recent_terminal_jobs() {
        let ids = (0..5).map(|_| ScanJobId::new()).collect::<Vec<_>>();
        let mut table = IndexMap::new();
        table.insert(ids[0], ScanJobStatus::Finished);
        table.insert(ids[1], ScanJobStatus::Started);
        table.insert(ids[2], ScanJobStatus::Failed);
        table.insert(ids[3], ScanJobStatus::Cancelled);
        table.insert(ids[4], ScanJobStatus::Queued);

        prune_terminal(&mut table, 1);
        assert_eq!(
            table.keys().copied().collect::<Vec<_>>(),
            vec![ids[1], ids[3], ids[4]]
        );
        prune_terminal(&mut table, 0);
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec![ids[1], ids[4]]);
    }

    #[test]
    fn test_job_id_round_trip() {
        let id = ScanJobId::new();
        assert_eq!(ScanJobId::from_str(&id.to_string()).unwrap(), id);
        assert!(ScanJobId::from_str("not-a-uuid").is_err());
    }
}
