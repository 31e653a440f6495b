//! Serialized task execution
//!
//! A [`TaskQueue`] owns one worker thread and the state that lives on it.
//! Submitted operations run strictly one at a time in submission order.
//! Their callbacks are forwarded to a dispatcher task on the submitter's
//! tokio runtime, which runs them one at a time in the order they were
//! produced.

mod callbacks;

pub use callbacks::{Callbacks, Progress};

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A callback invocation waiting for the dispatcher
pub(crate) type Dispatch = Box<dyn FnOnce() + Send>;

/// Why a submitted task did not produce a value
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task queue shut down before the task ran")]
    Cancelled,
}

impl TaskError {
    /// Typed cause of a failed task, searched through its context chain
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            TaskError::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Errors starting a queue
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("task queue must be started inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Completion half of a submitted task
pub struct TaskHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the task to finish
    pub async fn wait(self) -> Result<T, TaskError> {
        self.rx.await.unwrap_or(Err(TaskError::Cancelled))
    }
}

/// Single-worker execution lane owning a state of type `S`
pub struct TaskQueue<S> {
    name: String,
    jobs: Option<std_mpsc::Sender<Job<S>>>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl<S> TaskQueue<S>
where
    S: Send + 'static,
{
    /// Start the worker thread and the callback dispatcher.
    ///
    /// Must be called from inside a tokio runtime; callbacks run there.
    pub fn spawn(name: impl Into<String>, state: S) -> Result<Self, QueueError> {
        let name = name.into();
        let runtime = tokio::runtime::Handle::try_current()?;

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_dispatcher(name.clone(), dispatch_rx));

        let (jobs_tx, jobs_rx) = std_mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let worker_closed = Arc::clone(&closed);
        let worker_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(worker_name, state, jobs_rx, worker_closed))?;

        info!("Task queue {} started", name);
        Ok(Self {
            name,
            jobs: Some(jobs_tx),
            dispatch: dispatch_tx,
            closed,
            next_id: AtomicU64::new(1),
            worker: Some(worker),
        })
    }

    /// Queue `op` behind every previously submitted task.
    ///
    /// Returns immediately. `op` runs on the worker thread with exclusive
    /// access to the lane state; its outcome reaches `callbacks` and the
    /// returned handle.
    pub fn submit<T, P, F>(&self, op: F, callbacks: Callbacks<T, P>) -> TaskHandle<T>
    where
        T: Clone + Send + 'static,
        P: Send + 'static,
        F: FnOnce(&mut S, &Progress<P>) -> anyhow::Result<T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (result_tx, result_rx) = oneshot::channel();
        let handle = TaskHandle { id, rx: result_rx };

        let Callbacks {
            on_progress,
            on_result,
            on_error,
        } = callbacks;
        let progress = Progress::new(self.dispatch.clone(), on_progress);
        let dispatch = self.dispatch.clone();
        let name = self.name.clone();

        let job: Job<S> = Box::new(move |state: &mut S| {
            debug!("Task {} on {} started", id, name);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(state, &progress)));
            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(TaskError::Failed(Arc::new(err))),
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };
            drop(progress);

            let delivery: Option<Dispatch> = match &result {
                Ok(value) => on_result.map(|on_result| {
                    let value = value.clone();
                    Box::new(move || on_result(value)) as Dispatch
                }),
                Err(err) => match on_error {
                    Some(on_error) => {
                        let err = err.clone();
                        Some(Box::new(move || on_error(err)) as Dispatch)
                    }
                    None => {
                        error!("Task {} on {} failed: {}", id, name, err);
                        None
                    }
                },
            };

            if let Some(delivery) = delivery {
                if dispatch.send(delivery).is_err() {
                    debug!("Dispatcher for {} is gone, dropping callback", name);
                }
            }
            let _ = result_tx.send(result);
        });

        let sent = self.jobs.as_ref().is_some_and(|jobs| jobs.send(job).is_ok());
        if !sent {
            debug!("Task {} submitted to closed queue {}", id, self.name);
        }

        handle
    }

    /// Stop accepting work and wait for the worker to exit.
    ///
    /// Queued tasks that have not started are dropped and their handles
    /// resolve to [`TaskError::Cancelled`]; a running task completes first.
    /// The queue is closed as soon as this is called; the returned future
    /// only waits for the worker thread.
    pub fn shutdown(mut self) -> impl Future<Output = ()> + Send + 'static {
        self.close();
        let worker = self.worker.take();
        let name = self.name.clone();

        async move {
            let Some(worker) = worker else {
                return;
            };
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => info!("Task queue {} stopped", name),
                Ok(Err(_)) => error!("Task queue {} worker panicked", name),
                Err(e) => error!("Failed to join task queue {}: {}", name, e),
            }
        }
    }
}

impl<S> TaskQueue<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.jobs.take();
    }
}

impl<S> Drop for TaskQueue<S> {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker<S>(
    name: String,
    mut state: S,
    jobs: std_mpsc::Receiver<Job<S>>,
    closed: Arc<AtomicBool>,
) {
    debug!("Worker for {} running", name);

    for job in jobs {
        if closed.load(Ordering::Acquire) {
            // Dropping the job drops its result sender
            debug!("Dropping queued task on closed queue {}", name);
            continue;
        }
        job(&mut state);
    }

    debug!("Worker for {} exiting", name);
}

async fn run_dispatcher(name: String, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(delivery) = rx.recv().await {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(delivery)) {
            error!(
                "Callback on {} panicked: {}",
                name,
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn runs_tasks_in_submission_order_one_at_a_time() {
        let queue = TaskQueue::spawn("test-order", Vec::<usize>::new()).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            handles.push(queue.submit(
                move |seen: &mut Vec<usize>, _: &Progress<()>| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(2));
                    seen.push(i);
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(seen.clone())
                },
                Callbacks::new(),
            ));
        }

        let last = handles.pop().unwrap().wait().await.unwrap();
        assert_eq!(last, (0..8).collect::<Vec<_>>());
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivers_progress_before_result() {
        let queue = TaskQueue::spawn("test-progress", ()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let progress_tx = tx.clone();

        queue.submit(
            |_: &mut (), progress: &Progress<u32>| {
                for step in 1..=3 {
                    progress.report(step);
                }
                Ok("done")
            },
            Callbacks::new()
                .on_progress(move |step| {
                    let _ = progress_tx.send(format!("progress {}", step));
                })
                .on_result(move |value| {
                    let _ = tx.send(format!("result {}", value));
                }),
        );

        let mut events = Vec::new();
        for _ in 0..4 {
            events.push(recv(&mut rx).await);
        }
        assert_eq!(
            events,
            vec!["progress 1", "progress 2", "progress 3", "result done"]
        );
    }

    #[tokio::test]
    async fn routes_failures_to_on_error_and_keeps_running() {
        let queue = TaskQueue::spawn("test-errors", 0u32).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let err_tx = tx.clone();

        let failed = queue.submit(
            |_: &mut u32, _: &Progress<()>| -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            },
            Callbacks::new().on_error(move |err: TaskError| {
                let _ = err_tx.send(err.to_string());
            }),
        );
        let next = queue.submit(
            |count: &mut u32, _: &Progress<()>| {
                *count += 1;
                Ok(*count)
            },
            Callbacks::new().on_result(move |n| {
                let _ = tx.send(format!("ok {}", n));
            }),
        );

        assert_eq!(recv(&mut rx).await, "disk full");
        assert_eq!(recv(&mut rx).await, "ok 1");
        assert!(matches!(failed.wait().await, Err(TaskError::Failed(_))));
        assert_eq!(next.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_without_on_error_is_swallowed() {
        let queue = TaskQueue::spawn("test-swallow", ()).unwrap();

        let failed = queue.submit(
            |_: &mut (), _: &Progress<()>| -> anyhow::Result<()> { anyhow::bail!("boom") },
            Callbacks::new(),
        );
        let next = queue.submit(|_: &mut (), _: &Progress<()>| Ok(7), Callbacks::new());

        assert!(failed.wait().await.is_err());
        assert_eq!(next.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn panics_are_reported_and_lane_survives() {
        let queue = TaskQueue::spawn("test-panic", ()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.submit(
            |_: &mut (), _: &Progress<()>| -> anyhow::Result<()> { panic!("corrupt state") },
            Callbacks::new().on_error(move |err: TaskError| {
                let _ = tx.send(err);
            }),
        );
        let next = queue.submit(|_: &mut (), _: &Progress<()>| Ok("alive"), Callbacks::new());

        match recv(&mut rx).await {
            TaskError::Panicked(msg) => assert_eq!(msg, "corrupt state"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(next.wait().await.unwrap(), "alive");
    }

    #[tokio::test]
    async fn downcast_finds_typed_cause() {
        #[derive(Debug, Error)]
        #[error("root missing")]
        struct RootMissing;

        let queue = TaskQueue::spawn("test-downcast", ()).unwrap();
        let handle = queue.submit(
            |_: &mut (), _: &Progress<()>| -> anyhow::Result<()> {
                Err(anyhow::Error::new(RootMissing).context("rebuild failed"))
            },
            Callbacks::new(),
        );

        let err = handle.wait().await.unwrap_err();
        assert!(err.downcast_ref::<RootMissing>().is_some());
        assert_eq!(err.to_string(), "rebuild failed: root missing");
    }

    #[tokio::test]
    async fn shutdown_drops_queued_tasks_but_finishes_running_one() {
        let queue = TaskQueue::spawn("test-shutdown", ()).unwrap();
        let (started_tx, started_rx) = std_mpsc::channel::<()>();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let first_ran = Arc::clone(&ran);
        let first = queue.submit(
            move |_: &mut (), _: &Progress<()>| {
                started_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
                first_ran.lock().unwrap().push("first");
                Ok(1)
            },
            Callbacks::new(),
        );
        let second_ran = Arc::clone(&ran);
        let second = queue.submit(
            move |_: &mut (), _: &Progress<()>| {
                second_ran.lock().unwrap().push("second");
                Ok(2)
            },
            Callbacks::new(),
        );

        started_rx.recv().unwrap();
        let stopped = queue.shutdown();
        gate_tx.send(()).unwrap();

        assert_eq!(first.wait().await.unwrap(), 1);
        assert!(matches!(second.wait().await, Err(TaskError::Cancelled)));
        stopped.await;
        assert_eq!(*ran.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let result = TaskQueue::spawn("no-runtime", ());
        assert!(matches!(result, Err(QueueError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn handle_ids_increase() {
        let queue = TaskQueue::spawn("test-ids", ()).unwrap();
        let a = queue.submit(|_: &mut (), _: &Progress<()>| Ok(()), Callbacks::new());
        let b = queue.submit(|_: &mut (), _: &Progress<()>| Ok(()), Callbacks::new());
        assert!(b.id() > a.id());
        assert_eq!(queue.name(), "test-ids");
        assert!(!queue.is_closed());
    }
}
