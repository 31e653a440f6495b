//! Per-task callbacks and progress reporting

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use super::{Dispatch, TaskError};

/// Optional callbacks for one submitted task.
///
/// All three run on the queue's dispatcher task, never concurrently with
/// each other, in the order the worker produced them.
pub struct Callbacks<T, P = ()> {
    pub(super) on_progress: Option<Box<dyn FnMut(P) + Send>>,
    pub(super) on_result: Option<Box<dyn FnOnce(T) + Send>>,
    pub(super) on_error: Option<Box<dyn FnOnce(TaskError) + Send>>,
}

impl<T, P> Default for Callbacks<T, P> {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_result: None,
            on_error: None,
        }
    }
}

impl<T, P> Callbacks<T, P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called zero or more times while the task runs
    pub fn on_progress(mut self, f: impl FnMut(P) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called once with the task's return value
    pub fn on_result(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_result = Some(Box::new(f));
        self
    }

    /// Called once if the task fails or panics.
    /// Without it the failure is only logged.
    pub fn on_error(mut self, f: impl FnOnce(TaskError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

type ProgressSink<P> = Arc<Mutex<Box<dyn FnMut(P) + Send>>>;

/// Progress channel handed to a running task
pub struct Progress<P> {
    dispatch: mpsc::UnboundedSender<Dispatch>,
    sink: Option<ProgressSink<P>>,
}

impl<P> Progress<P>
where
    P: Send + 'static,
{
    pub(super) fn new(
        dispatch: mpsc::UnboundedSender<Dispatch>,
        on_progress: Option<Box<dyn FnMut(P) + Send>>,
    ) -> Self {
        Self {
            dispatch,
            sink: on_progress.map(|f| Arc::new(Mutex::new(f))),
        }
    }

    /// Whether anyone listens; lets tasks skip building progress values
    pub fn is_observed(&self) -> bool {
        self.sink.is_some()
    }

    /// Queue a progress value for the submitter's callback
    pub fn report(&self, value: P) {
        let Some(sink) = &self.sink else {
            return;
        };

        let sink = Arc::clone(sink);
        let delivery: Dispatch = Box::new(move || {
            let mut on_progress = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            on_progress(value);
        });

        if self.dispatch.send(delivery).is_err() {
            debug!("Dropping progress update, dispatcher is gone");
        }
    }
}
