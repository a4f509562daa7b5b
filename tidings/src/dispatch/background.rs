//! Dedicated worker threads for background dispatch.

use super::Job;
use futures::{
    channel::mpsc::{self, UnboundedSender},
    executor::block_on_stream,
};
use std::{io, thread};

/// A single thread draining a FIFO queue of jobs.
///
/// Jobs run one at a time in submission order. The thread exits once every
/// sender is dropped and the queue is empty.
pub(crate) struct BackgroundWorker {
    queue: UnboundedSender<Job>,
}

impl BackgroundWorker {
    pub(crate) fn spawn(name: String) -> io::Result<Self> {
        let (queue, jobs) = mpsc::unbounded::<Job>();
        thread::Builder::new().name(name).spawn(move || {
            for job in block_on_stream(jobs) {
                job();
            }
        })?;
        Ok(Self { queue })
    }

    /// Queue `job`, handing it back if the worker is gone.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        self.queue
            .unbounded_send(job)
            .map_err(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex, mpsc as std_mpsc};
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order_on_one_thread() {
        let worker = BackgroundWorker::spawn("test-bg".to_string()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = std_mpsc::channel();

        for i in 0..20 {
            let seen = seen.clone();
            worker
                .submit(Box::new(move || {
                    let name = thread::current().name().map(str::to_owned);
                    seen.lock().unwrap().push((i, name));
                }))
                .ok()
                .unwrap();
        }
        worker
            .submit(Box::new(move || done_tx.send(()).unwrap()))
            .ok()
            .unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let seen = seen.lock().unwrap();
        let order: Vec<i32> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
        assert!(seen.iter().all(|(_, name)| name.as_deref() == Some("test-bg")));
    }
}
