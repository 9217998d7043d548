//! Task runners.
//!
//! A [`TaskRunner`] accepts boxed tasks and runs them in order on one
//! sequence. [`SequenceThread`] backs a logical thread with a dedicated OS
//! thread driving a current-thread tokio runtime.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::error::{HostError, Result};

/// A unit of work posted to a runner.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs posted tasks in sequence.
///
/// Posting returns `false` when the runner no longer accepts work; the task
/// is dropped without running.
pub trait TaskRunner: Send + Sync {
    fn post_delayed_task(&self, task: Task, delay: Duration) -> bool;

    fn post_non_nestable_delayed_task(&self, task: Task, delay: Duration) -> bool;

    /// True when called from the sequence this runner executes on.
    fn runs_tasks_in_current_sequence(&self) -> bool;

    fn post_task(&self, task: Task) -> bool {
        self.post_delayed_task(task, Duration::ZERO)
    }

    fn post_non_nestable_task(&self, task: Task) -> bool {
        self.post_non_nestable_delayed_task(task, Duration::ZERO)
    }
}

enum Message {
    Run(Task),
    Delayed(Task, Duration),
    Quit,
}

/// A logical thread backed by one OS thread.
///
/// Tasks run strictly in post order. There are no nested run loops here, so
/// nestable and non-nestable tasks are queued identically.
pub struct SequenceThread {
    name: String,
    sender: mpsc::UnboundedSender<Message>,
    thread_id: std::thread::ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SequenceThread {
    /// Spawn the OS thread and start draining its queue.
    pub fn start(name: &str) -> Result<Arc<Self>> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        let loop_sender = sender.clone();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HostError::Thread(format!("failed to build runtime for {}: {}", name, e)))?;

        let thread_name = name.to_string();
        let handle = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            runtime.block_on(async move {
                while let Some(message) = receiver.recv().await {
                    match message {
                        Message::Run(task) => task(),
                        Message::Delayed(task, delay) => {
                            let sender = loop_sender.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = sender.send(Message::Run(task));
                            });
                        }
                        Message::Quit => break,
                    }
                }
            });
            debug!("{} exited", thread_name);
        })?;

        let thread_id = handle.thread().id();
        Ok(Arc::new(Self {
            name: name.to_string(),
            sender,
            thread_id,
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting work and join the thread.
    ///
    /// Tasks already queued ahead of the stop request still run; delayed
    /// tasks that have not fired are dropped.
    pub fn stop(&self) {
        let _ = self.sender.send(Message::Quit);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if self.runs_tasks_in_current_sequence() {
                warn!("{} asked to join itself; detaching", self.name);
                return;
            }
            if handle.join().is_err() {
                warn!("{} panicked", self.name);
            }
        }
    }

    fn enqueue(&self, task: Task, delay: Duration) -> bool {
        let message = if delay.is_zero() {
            Message::Run(task)
        } else {
            Message::Delayed(task, delay)
        };
        self.sender.send(message).is_ok()
    }
}

impl TaskRunner for SequenceThread {
    fn post_delayed_task(&self, task: Task, delay: Duration) -> bool {
        self.enqueue(task, delay)
    }

    fn post_non_nestable_delayed_task(&self, task: Task, delay: Duration) -> bool {
        self.enqueue(task, delay)
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }
}

impl Drop for SequenceThread {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Quit);
    }
}
