//! Broker core.
//!
//! The [`Broker`] owns a topic registry and an extension pipeline and drives
//! every publish through them:
//!
//! 1. before-publish hooks
//! 2. snapshot of the topic's subscriptions
//! 3. dispatch of each subscription per its [`DispatchPolicy`], wrapped in
//!    before/after-handle hooks
//! 4. after-publish hooks
//!
//! Subscriptions registered after step 2 do not see the firing; a
//! subscription unregistered after step 2 still does.

use crate::{
    builder::{BrokerBuilder, BrokerConfig},
    dispatch::{self, Delivery, Job, in_flight::InFlight, pool::WorkerPool},
    pipeline::{Extension, ExtensionSet, HandleOutcome, Pipeline},
    registry::{Endpoint, PublicationEndpoint, SubscriptionEndpoint, TopicRegistry},
    stats::{BrokerStats, Stats},
};
use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tidings_core::{
    BrokerError, Declarations, DispatchPolicy, EndpointId, Endpoints, Fault, FaultCause,
    FaultHandling, FiredMessage, HandlerFault, OwnerId, Payload, Sender, TopicInfo,
};
use tracing::{debug, error, trace};

/// An in-process event broker.
///
/// Cloning is cheap and yields a handle on the same broker. Brokers are
/// independent of each other; nothing is process-global.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

struct Inner {
    registry: TopicRegistry,
    pipeline: Pipeline,
    pool: WorkerPool,
    in_flight: Arc<InFlight>,
    stats: Stats,
    config: BrokerConfig,
}

/// A non-owning handle on a [`Broker`].
#[derive(Clone)]
pub struct WeakBroker {
    inner: Weak<Inner>,
}

impl WeakBroker {
    /// The broker, if it is still alive.
    pub fn upgrade(&self) -> Option<Broker> {
        self.inner.upgrade().map(|inner| Broker { inner })
    }
}

impl fmt::Debug for WeakBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBroker")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Broker {
    /// Create a broker with the default configuration.
    pub fn new() -> Result<Self, BrokerError> {
        Self::with_config(BrokerConfig::default())
    }

    /// Start building a broker.
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Create a broker from `config`.
    pub fn with_config(config: BrokerConfig) -> Result<Self, BrokerError> {
        let pool = WorkerPool::new(&config).map_err(BrokerError::WorkerSpawn)?;
        Ok(Self {
            inner: Arc::new(Inner {
                registry: TopicRegistry::new(),
                pipeline: Pipeline::new(),
                pool,
                in_flight: Arc::new(InFlight::default()),
                stats: Stats::default(),
                config,
            }),
        })
    }

    /// A non-owning handle on this broker.
    pub fn downgrade(&self) -> WeakBroker {
        WeakBroker {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The configuration the broker was built with.
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Append `extension` to the pipeline.
    ///
    /// Extensions should be added before publishing starts; publishes already
    /// in progress keep the list they started with.
    pub fn add_extension<X: Extension>(&self, extension: Arc<X>) {
        self.add_extension_dyn(extension);
    }

    pub(crate) fn add_extension_dyn(&self, extension: Arc<dyn Extension>) {
        debug!(extension = extension.name(), "adding extension");
        self.inner.pipeline.push(extension.clone());
        extension.attached(&self.downgrade());
    }

    /// Register every endpoint `instance` declares.
    ///
    /// Either all endpoints are registered or, on error, none. The broker
    /// keeps only weak references to `instance`.
    pub fn register<T: Endpoints>(&self, instance: &Arc<T>) -> Result<(), BrokerError> {
        let owner = OwnerId::of(instance);
        let mut declarations = Declarations::new();
        instance.declare(&mut declarations);
        let (publications, subscriptions) = declarations.into_parts();

        let erased: Arc<dyn Any + Send + Sync> = instance.clone();
        let alive = Arc::downgrade(&erased);
        drop(erased);

        let mut endpoints = Vec::with_capacity(publications.len() + subscriptions.len());
        let mut ordinal = 0u32;
        for publication in publications {
            endpoints.push(Endpoint::Publication(PublicationEndpoint::new(
                EndpointId::new(owner, ordinal),
                publication.topic,
                publication.restriction,
                alive.clone(),
            )));
            ordinal += 1;
        }
        for subscription in subscriptions {
            let target = Arc::downgrade(instance);
            let handler = subscription.handler;
            endpoints.push(Endpoint::Subscription(Arc::new(SubscriptionEndpoint::new(
                EndpointId::new(owner, ordinal),
                subscription.topic,
                subscription.policy,
                alive.clone(),
                Box::new(move |message: &FiredMessage| {
                    target
                        .upgrade()
                        .map(|target| handler(target.as_ref(), message))
                }),
            ))));
            ordinal += 1;
        }

        self.inner.registry.register_all(endpoints)?;
        debug!(%owner, endpoints = ordinal, "registered");
        Ok(())
    }

    /// Remove every endpoint of `instance`. Does nothing if it is not registered.
    pub fn unregister<T: Endpoints>(&self, instance: &Arc<T>) {
        let owner = OwnerId::of(instance);
        let removed = self.inner.registry.unregister_owner(owner);
        debug!(%owner, removed, "unregistered");
    }

    /// Remove a single endpoint. Returns whether it was registered.
    pub fn unregister_endpoint(&self, id: EndpointId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Fire `topic` through the publication `publisher` declared for it.
    pub fn fire<T: Endpoints>(
        &self,
        publisher: &Arc<T>,
        topic: &str,
        payload: Payload,
    ) -> Result<(), BrokerError> {
        let owner = OwnerId::of(publisher);
        let restriction = self.inner.registry.publication(owner, topic).ok_or_else(|| {
            BrokerError::UnknownPublication {
                owner,
                topic: topic.into(),
            }
        })?;
        self.publish_message(
            FiredMessage::new(topic, Sender::Publisher(owner), payload)
                .with_restriction(restriction),
        )
    }

    /// Publish an unrestricted message.
    pub fn publish(&self, topic: &str, sender: Sender, payload: Payload) -> Result<(), BrokerError> {
        self.publish_message(FiredMessage::new(topic, sender, payload))
    }

    /// Publish `message` to the subscriptions of its topic.
    ///
    /// Returns once synchronous handlers have run and detached ones have been
    /// scheduled. Errors only report problems on the caller's side:
    /// unhandled synchronous handler faults, or a restriction that a
    /// subscription cannot satisfy. A rejected message is not counted and
    /// no extension hook sees it.
    pub fn publish_message(&self, message: FiredMessage) -> Result<(), BrokerError> {
        let subscriptions = self.inner.registry.lookup_subscriptions(message.topic());
        if let Some(incompatible) = subscriptions
            .iter()
            .find(|s| !message.restriction().permits(s.policy()))
        {
            return Err(BrokerError::IncompatibleDispatchPolicy {
                topic: message.topic_name().clone(),
                restriction: message.restriction(),
                policy: incompatible.policy(),
            });
        }

        let message = Arc::new(message);
        let extensions = self.inner.pipeline.snapshot();
        self.inner.stats.record_published();

        extensions.before_publish(self, &message);

        trace!(
            topic = message.topic(),
            sender = %message.sender(),
            subscriptions = subscriptions.len(),
            "publishing"
        );

        let mut unhandled = Vec::new();
        for subscription in subscriptions {
            match subscription.policy() {
                DispatchPolicy::Synchronous => {
                    let Some(fault) = self.deliver(&extensions, &subscription, &message) else {
                        continue;
                    };
                    if extensions.route(Fault::Handler(&fault)) == FaultHandling::Unhandled {
                        unhandled.push(fault);
                    }
                }
                DispatchPolicy::Asynchronous => {
                    let job = self.detached_job(&extensions, subscription, &message);
                    self.inner.pool.execute(job);
                }
                DispatchPolicy::Background => {
                    let job = self.detached_job(&extensions, subscription.clone(), &message);
                    let prefix = &self.inner.config.background_name_prefix;
                    if let Err(err) = subscription.submit_background(prefix, job) {
                        let fault = HandlerFault {
                            topic: message.topic_name().clone(),
                            subscription: subscription.id(),
                            policy: DispatchPolicy::Background,
                            cause: FaultCause::Error(Box::new(err)),
                        };
                        self.inner.stats.record_handler_fault();
                        self.surface_detached(&extensions, &fault);
                    }
                }
            }
        }

        extensions.after_publish(self, &message);

        if unhandled.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::HandlerFaults {
                topic: message.topic_name().clone(),
                faults: unhandled,
            })
        }
    }

    /// Block until every queued asynchronous and background dispatch has
    /// finished, or `timeout` elapses. Returns whether the broker went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.in_flight.wait_idle(timeout)
    }

    /// Counters since the broker was created.
    pub fn stats(&self) -> BrokerStats {
        self.inner.stats.snapshot()
    }

    /// Snapshot of `topic`'s live endpoints.
    pub fn topic_info(&self, topic: &str) -> TopicInfo {
        self.inner.registry.topic_info(topic)
    }

    /// Snapshot of every topic with at least one endpoint, sorted by name.
    pub fn topics(&self) -> Vec<TopicInfo> {
        self.inner.registry.topics()
    }

    /// Log and count a fault nobody handled.
    pub(crate) fn record_unhandled(&self, fault: Fault<'_>) {
        self.inner.stats.record_unhandled();
        error!(topic = fault.topic(), %fault, "unhandled fault");
    }

    /// Run one handler with its handle hooks. Returns the fault, if any,
    /// without routing it.
    fn deliver(
        &self,
        extensions: &ExtensionSet,
        subscription: &SubscriptionEndpoint,
        message: &FiredMessage,
    ) -> Option<HandlerFault> {
        if !subscription.is_alive() {
            return None;
        }
        let info = subscription.info();
        extensions.before_handle(self, message, &info);

        let (outcome, fault) = match dispatch::run_handler(subscription, message) {
            Ok(Delivery::Handled) => {
                self.inner.stats.record_delivered();
                (HandleOutcome::Completed, None)
            }
            Ok(Delivery::OwnerGone) => {
                trace!(subscription = %info.id, "subscriber dropped before dispatch");
                (HandleOutcome::Completed, None)
            }
            Err(cause) => {
                self.inner.stats.record_handler_fault();
                let fault = HandlerFault {
                    topic: message.topic_name().clone(),
                    subscription: info.id,
                    policy: info.policy,
                    cause,
                };
                (HandleOutcome::Faulted, Some(fault))
            }
        };

        extensions.after_handle(self, message, &info, outcome);
        fault
    }

    fn detached_job(
        &self,
        extensions: &ExtensionSet,
        subscription: Arc<SubscriptionEndpoint>,
        message: &Arc<FiredMessage>,
    ) -> Job {
        let broker = self.clone();
        let extensions = extensions.clone();
        let message = message.clone();
        let guard = self.inner.in_flight.enter();
        Box::new(move || {
            let _guard = guard;
            if let Some(fault) = broker.deliver(&extensions, &subscription, &message) {
                broker.surface_detached(&extensions, &fault);
            }
        })
    }

    /// Faults from detached dispatch never reach the publisher: they go to
    /// the fault hooks and, failing that, to the log.
    fn surface_detached(&self, extensions: &ExtensionSet, fault: &HandlerFault) {
        match extensions.route(Fault::Handler(fault)) {
            FaultHandling::Handled => debug!(%fault, "detached handler fault handled"),
            FaultHandling::Unhandled => self.record_unhandled(Fault::Handler(fault)),
        }
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("endpoints", &self.inner.registry.endpoint_count())
            .field("extensions", &self.inner.pipeline.snapshot().len())
            .field("pending", &self.inner.in_flight.pending())
            .field("stats", &self.stats())
            .finish()
    }
}
