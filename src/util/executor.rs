//! User-callback executor
// (c) 2025 Ross Younger

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send>;

/// Runs user callbacks on a dedicated worker thread, so application code
/// never executes under the client's dispatch lock (and is free to call
/// back into the client).
///
/// Tasks run strictly in submission order. Dropping the executor drains
/// nothing: queued tasks still run, then the worker exits and is joined.
pub(crate) struct CallbackExecutor {
    sender: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl CallbackExecutor {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name("mavftp-callbacks".into())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .ok();
        Self {
            sender: Some(sender),
            worker,
        }
    }

    /// Queues a task; silently dropped if the executor is shutting down.
    pub(crate) fn post<F: FnOnce() + Send + 'static>(&self, task: F) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(task));
        }
    }
}

impl Drop for CallbackExecutor {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
