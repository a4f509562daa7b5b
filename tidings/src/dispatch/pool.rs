//! Shared worker pool for asynchronous dispatch.

use super::Job;
use crate::builder::BrokerConfig;
use futures::executor::ThreadPool;
use std::io;

/// Thin wrapper over a `futures` thread pool running blocking jobs.
///
/// Jobs are expected to contain their own panics; a panic escaping a job
/// would take its pool thread down with it.
pub(crate) struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub(crate) fn new(config: &BrokerConfig) -> io::Result<Self> {
        let mut builder = ThreadPool::builder();
        builder.name_prefix(config.worker_name_prefix.clone());
        if let Some(size) = config.worker_threads {
            builder.pool_size(size.max(1));
        }
        Ok(Self {
            pool: builder.create()?,
        })
    }

    pub(crate) fn execute(&self, job: Job) {
        self.pool.spawn_ok(async move { job() });
    }
}
