use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use pflash_device::{DeviceChannel, ToolPaths};
use pflash_fetch::ArtifactFetcher;
use pflash_util::Config;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::events::{EventBus, EventLevel, EventPayload, EventStream};
use crate::runner::{run_task, TaskContext};
use crate::task::{TaskId, TaskKind, TaskSpec, TaskStatus};

pub const DEFAULT_WORKERS: usize = 2;

struct TaskRecord {
    kind: TaskKind,
    status: watch::Sender<TaskStatus>,
    cancel: watch::Sender<bool>,
    // Held while a status change is checked, announced and stored.
    transitions: Mutex<()>,
}

impl TaskRecord {
    fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            status: watch::channel(TaskStatus::Pending).0,
            cancel: watch::channel(false).0,
            transitions: Mutex::new(()),
        }
    }

    fn current(&self) -> TaskStatus {
        *self.status.borrow()
    }

    fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct Queued {
    id: TaskId,
    spec: TaskSpec,
    record: Arc<TaskRecord>,
}

struct Shared {
    bus: EventBus,
    fetcher: ArtifactFetcher,
    device: DeviceChannel,
    // Finished records are dropped on the next submit once no handle or
    // worker still refers to them.
    tasks: Mutex<HashMap<TaskId, Arc<TaskRecord>>>,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<TaskRecord>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        self.tasks().get(&id).cloned()
    }

    fn prune_finished(&self) {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|_, record| {
            !(record.current().is_terminal() && Arc::strong_count(record) == 1)
        });
        let pruned = before - tasks.len();
        if pruned > 0 {
            debug!("pruned {pruned} finished task records");
        }
    }

    fn announce(&self, id: TaskId, status: TaskStatus) {
        let level = match status {
            TaskStatus::Failed => EventLevel::Error,
            TaskStatus::Cancelled => EventLevel::Warning,
            _ => EventLevel::Info,
        };
        self.bus.publish(
            level,
            Some(id),
            format!("Task {status}"),
            EventPayload::StateChanged { status },
        );
    }

    /// The event goes out before waiters on the status are woken.
    fn set_status(&self, id: TaskId, record: &TaskRecord, next: TaskStatus) -> bool {
        let _guard = record.lock_transitions();
        if !record.current().can_transition_to(next) {
            return false;
        }
        self.announce(id, next);
        record.status.send_replace(next);
        true
    }

    // Pending tasks go straight to Cancelled. Running ones are only flagged;
    // their worker decides the final state.
    fn cancel(&self, id: TaskId, record: &TaskRecord) -> bool {
        let _guard = record.lock_transitions();
        let current = record.current();
        if current.is_terminal() {
            return false;
        }
        record.cancel.send_replace(true);
        if current == TaskStatus::Pending {
            self.announce(id, TaskStatus::Cancelled);
            record.status.send_replace(TaskStatus::Cancelled);
        } else {
            debug!("cancel requested for running task {id}");
        }
        true
    }

    async fn execute(&self, queued: Queued) {
        let Queued { id, spec, record } = queued;
        if !self.set_status(id, &record, TaskStatus::Running) {
            debug!("skipping task {id}: already {}", record.current());
            return;
        }

        let ctx = TaskContext {
            id,
            bus: self.bus.clone(),
            cancel: record.cancel.subscribe(),
            fetcher: self.fetcher.clone(),
            device: self.device.clone(),
        };
        let label = spec.describe();
        info!("Starting task {id}: {label}");

        // Own tokio task so a panic in one runner only fails that task.
        let outcome = match tokio::spawn(run_task(ctx, spec)).await {
            Ok(outcome) => outcome,
            Err(join) => {
                self.bus
                    .error(Some(id), format!("{label} aborted: {join}"));
                self.set_status(id, &record, TaskStatus::Failed);
                return;
            }
        };

        match outcome {
            Ok(()) => {
                self.set_status(id, &record, TaskStatus::Succeeded);
            }
            Err(err) if err.is_cancelled() => {
                self.bus.warn(Some(id), format!("{label} cancelled."));
                self.set_status(id, &record, TaskStatus::Cancelled);
            }
            Err(err) => {
                self.bus.error(Some(id), format!("{label} failed: {err}"));
                self.set_status(id, &record, TaskStatus::Failed);
            }
        }
    }
}

/// Caller-side view of one submitted task.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    record: Arc<TaskRecord>,
    shared: Arc<Shared>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.record.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.record.current()
    }

    /// Resolves once the task reaches a terminal state.
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.record.status.subscribe();
        let status = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.record.current(),
        };
        status
    }

    pub fn cancel(&self) -> bool {
        self.shared.cancel(self.id, &self.record)
    }
}

/// Fixed pool of workers draining one FIFO queue of tasks.
///
/// Tasks are independent: a failure in one is reported through the event bus
/// and the worker moves on to the next.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<Queued>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Starts `workers` (at least one) worker tasks on the current runtime.
    pub fn new(workers: usize, fetcher: ArtifactFetcher, device: DeviceChannel) -> Self {
        let shared = Arc::new(Shared {
            bus: EventBus::new(),
            fetcher,
            device,
            tasks: Mutex::new(HashMap::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|index| tokio::spawn(worker(index, Arc::clone(&shared), Arc::clone(&rx))))
            .collect();
        Self {
            shared,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Real HTTP client and real adb/fastboot processes, per `cfg`.
    pub fn from_config(cfg: &Config) -> Result<Self, SchedulerError> {
        let fetcher =
            ArtifactFetcher::from_config(cfg).map_err(|e| SchedulerError::Setup(e.to_string()))?;
        let device = DeviceChannel::with_process_session(ToolPaths::from_config(cfg));
        Ok(Self::new(cfg.workers, fetcher, device))
    }

    pub fn submit(&self, spec: impl Into<TaskSpec>) -> Result<TaskHandle, SchedulerError> {
        let spec = spec.into();
        match &spec {
            TaskSpec::FlashSequence(seq) if seq.is_empty() => {
                return Err(SchedulerError::EmptyFlashSequence)
            }
            TaskSpec::Download(download) if download.urls.is_empty() => {
                return Err(SchedulerError::NoSources)
            }
            _ => {}
        }

        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            return Err(SchedulerError::ShutDown);
        };

        self.shared.prune_finished();
        let id = TaskId::new();
        let record = Arc::new(TaskRecord::new(spec.kind()));
        self.shared.tasks().insert(id, Arc::clone(&record));
        self.shared.bus.publish(
            EventLevel::Info,
            Some(id),
            format!("Queued {}", spec.describe()),
            EventPayload::StateChanged {
                status: TaskStatus::Pending,
            },
        );

        let queued = Queued {
            id,
            spec,
            record: Arc::clone(&record),
        };
        if tx.send(queued).is_err() {
            self.shared.tasks().remove(&id);
            return Err(SchedulerError::ShutDown);
        }

        Ok(TaskHandle {
            id,
            record,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Requests cooperative cancellation. Returns false for unknown or
    /// already-finished tasks.
    ///
    /// Ids stay known while a [`TaskHandle`] for them is alive; finished
    /// tasks without one may be forgotten.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.shared.record(id) {
            Some(record) => self.shared.cancel(id, &record),
            None => false,
        }
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.shared.record(id).map(|record| record.current())
    }

    pub fn subscribe(&self) -> EventStream {
        self.shared.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn device(&self) -> &DeviceChannel {
        &self.shared.device
    }

    /// Stops accepting work, cancels everything not yet finished and waits
    /// for the workers to exit. Running tasks stop at their next cancellation
    /// point; in-flight device commands complete.
    pub async fn shutdown(&self) {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let pending: Vec<(TaskId, Arc<TaskRecord>)> = self
            .shared
            .tasks()
            .iter()
            .map(|(id, record)| (*id, Arc::clone(record)))
            .collect();
        for (id, record) in pending {
            self.shared.cancel(id, &record);
        }

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            if let Err(err) = handle.await {
                debug!("worker exited abnormally: {err}");
            }
        }
        info!("Task scheduler stopped");
    }
}

async fn worker(
    index: usize,
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Queued>>>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(queued) = next else {
            break;
        };
        shared.execute(queued).await;
    }
    debug!("worker {index} stopped");
}
