use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use eyre::Result;

use crate::logging;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size background pool for network fetches and progress saves.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || {
                    loop {
                        let job = match receiver.lock() {
                            Ok(guard) => guard.recv(),
                            Err(_) => break,
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job`. Returns false when the pool has shut down.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        if sender.send(Box::new(job)).is_err() {
            logging::warn("Worker pool is shut down; dropping job");
            return false;
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue drains.
        drop(self.sender.take());
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // The last owner can be a job running on one of our own workers.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                logging::warn("Worker thread panicked");
            }
        }
    }
}
