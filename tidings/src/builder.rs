//! Broker construction.

use crate::{broker::Broker, pipeline::Extension};
use std::sync::Arc;
use tidings_core::BrokerError;

/// Tunables fixed at broker construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Size of the shared pool running asynchronous handlers. `None` lets
    /// the pool pick one thread per CPU.
    pub worker_threads: Option<usize>,
    /// Name prefix of pool threads.
    pub worker_name_prefix: String,
    /// Name prefix of per-subscription background threads; the topic name
    /// is appended.
    pub background_name_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            worker_name_prefix: "tidings-worker-".to_string(),
            background_name_prefix: "tidings-bg-".to_string(),
        }
    }
}

/// Builder for a [`Broker`].
///
/// # Example
///
/// ```rust
/// use tidings::Broker;
///
/// let broker = Broker::builder()
///     .worker_threads(2)
///     .build()
///     .expect("worker pool");
/// assert!(broker.topics().is_empty());
/// ```
#[derive(Default)]
pub struct BrokerBuilder {
    config: BrokerConfig,
    extensions: Vec<Arc<dyn Extension>>,
}

impl BrokerBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the size of the asynchronous worker pool.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = Some(threads);
        self
    }

    /// Name prefix of pool threads.
    pub fn worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.worker_name_prefix = prefix.into();
        self
    }

    /// Name prefix of background threads.
    pub fn background_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.background_name_prefix = prefix.into();
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an extension; extensions run in the order they are added.
    pub fn extension<X: Extension>(mut self, extension: Arc<X>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Build the broker and attach its extensions.
    pub fn build(self) -> Result<Broker, BrokerError> {
        let broker = Broker::with_config(self.config)?;
        for extension in self.extensions {
            broker.add_extension_dyn(extension);
        }
        Ok(broker)
    }
}
