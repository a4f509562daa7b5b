//! Topic registry.
//!
//! Maps topic names to the publication and subscription endpoints registered
//! for them. Lookups hand out copies so that dispatch never iterates a list
//! that a concurrent registration is modifying.

use crate::dispatch::{Job, background::BackgroundWorker};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::{
    any::Any,
    collections::HashMap,
    io,
    sync::{Arc, Weak},
};
use tidings_core::{
    BoxError, BrokerError, DispatchPolicy, EndpointId, FiredMessage, HandlerRestriction, OwnerId,
    PublicationInfo, SubscriptionInfo, TopicInfo,
};
use tracing::trace;

/// Weak handle on the instance that owns an endpoint.
pub(crate) type OwnerRef = Weak<dyn Any + Send + Sync>;

/// Type-erased handler. Returns `None` when the owner has been dropped.
pub(crate) type Invoke = Box<dyn Fn(&FiredMessage) -> Option<Result<(), BoxError>> + Send + Sync>;

/// A registered publication.
pub(crate) struct PublicationEndpoint {
    id: EndpointId,
    topic: Arc<str>,
    restriction: HandlerRestriction,
    owner: OwnerRef,
}

impl PublicationEndpoint {
    pub(crate) fn new(
        id: EndpointId,
        topic: Arc<str>,
        restriction: HandlerRestriction,
        owner: OwnerRef,
    ) -> Self {
        Self {
            id,
            topic,
            restriction,
            owner,
        }
    }

    fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }

    fn info(&self) -> PublicationInfo {
        PublicationInfo {
            id: self.id,
            restriction: self.restriction,
        }
    }
}

/// A registered subscription.
///
/// Background subscriptions start their dedicated worker on first use; the
/// worker stops once the endpoint is dropped and its queue is drained.
pub(crate) struct SubscriptionEndpoint {
    id: EndpointId,
    topic: Arc<str>,
    policy: DispatchPolicy,
    owner: OwnerRef,
    invoke: Invoke,
    worker: Mutex<Option<BackgroundWorker>>,
}

impl SubscriptionEndpoint {
    pub(crate) fn new(
        id: EndpointId,
        topic: Arc<str>,
        policy: DispatchPolicy,
        owner: OwnerRef,
        invoke: Invoke,
    ) -> Self {
        Self {
            id,
            topic,
            policy,
            owner,
            invoke,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> EndpointId {
        self.id
    }

    pub(crate) fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }

    pub(crate) fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            topic: self.topic.clone(),
            policy: self.policy,
        }
    }

    /// Run the handler. `None` if the owner is gone.
    pub(crate) fn invoke(&self, message: &FiredMessage) -> Option<Result<(), BoxError>> {
        (self.invoke)(message)
    }

    /// Queue `job` on this subscription's dedicated worker, starting it if needed.
    pub(crate) fn submit_background(&self, thread_prefix: &str, job: Job) -> io::Result<()> {
        let mut slot = self.worker.lock();
        let worker = match slot.take() {
            Some(worker) => worker,
            None => BackgroundWorker::spawn(format!("{thread_prefix}{}", self.topic))?,
        };
        let submitted = worker.submit(job);
        *slot = Some(worker);
        submitted.map_err(|_| io::Error::other("background worker has stopped"))
    }
}

/// An endpoint to register.
pub(crate) enum Endpoint {
    Publication(PublicationEndpoint),
    Subscription(Arc<SubscriptionEndpoint>),
}

impl Endpoint {
    fn id(&self) -> EndpointId {
        match self {
            Endpoint::Publication(publication) => publication.id,
            Endpoint::Subscription(subscription) => subscription.id,
        }
    }

    fn topic(&self) -> &Arc<str> {
        match self {
            Endpoint::Publication(publication) => &publication.topic,
            Endpoint::Subscription(subscription) => &subscription.topic,
        }
    }
}

#[derive(Default)]
struct TopicEntry {
    publications: Vec<PublicationEndpoint>,
    subscriptions: Vec<Arc<SubscriptionEndpoint>>,
}

impl TopicEntry {
    /// Endpoints whose owner has been dropped.
    fn dead_ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        let publications = self
            .publications
            .iter()
            .filter(|p| !p.is_alive())
            .map(|p| p.id);
        let subscriptions = self
            .subscriptions
            .iter()
            .filter(|s| !s.is_alive())
            .map(|s| s.id);
        publications.chain(subscriptions)
    }

    fn has_dead(&self) -> bool {
        self.dead_ids().next().is_some()
    }

    fn remove(&mut self, id: EndpointId) {
        self.publications.retain(|p| p.id != id);
        self.subscriptions.retain(|s| s.id != id);
    }

    fn is_empty(&self) -> bool {
        self.publications.is_empty() && self.subscriptions.is_empty()
    }

    fn info(&self, name: &Arc<str>) -> TopicInfo {
        TopicInfo {
            name: name.clone(),
            publications: self
                .publications
                .iter()
                .filter(|p| p.is_alive())
                .map(PublicationEndpoint::info)
                .collect(),
            subscriptions: self
                .subscriptions
                .iter()
                .filter(|s| s.is_alive())
                .map(|s| s.info())
                .collect(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    topics: HashMap<Arc<str>, TopicEntry>,
    /// endpoint -> topic it is filed under
    index: HashMap<EndpointId, Arc<str>>,
}

impl RegistryState {
    fn remove(&mut self, id: EndpointId) -> bool {
        let Some(topic) = self.index.remove(&id) else {
            return false;
        };
        if let Some(entry) = self.topics.get_mut(&topic) {
            entry.remove(id);
            if entry.is_empty() {
                self.topics.remove(&topic);
            }
        }
        true
    }

    fn remove_owner(&mut self, owner: OwnerId) -> usize {
        let ids: Vec<EndpointId> = self
            .index
            .keys()
            .filter(|id| id.owner() == owner)
            .copied()
            .collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    /// Drop the endpoints of dropped owners, in `topic` or everywhere.
    ///
    /// Removing a subscription releases its background worker, whose thread
    /// exits once the queued work drained.
    fn prune(&mut self, topic: Option<&str>) -> usize {
        let dead: Vec<EndpointId> = match topic {
            Some(topic) => self
                .topics
                .get(topic)
                .map(|entry| entry.dead_ids().collect())
                .unwrap_or_default(),
            None => self
                .topics
                .values()
                .flat_map(|entry| entry.dead_ids())
                .collect(),
        };
        let pruned = dead.into_iter().filter(|id| self.remove(*id)).count();
        if pruned > 0 {
            trace!(pruned, "pruned endpoints of dropped owners");
        }
        pruned
    }

    fn claim(&self, endpoint: &Endpoint) -> Result<(), BrokerError> {
        match self.index.get(&endpoint.id()) {
            Some(topic) => Err(BrokerError::DuplicateRegistration {
                endpoint: endpoint.id(),
                topic: topic.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_compatibility(&self, batch: &[Endpoint]) -> Result<(), BrokerError> {
        for endpoint in batch {
            let Endpoint::Subscription(subscription) = endpoint else {
                continue;
            };
            let existing = self
                .topics
                .get(&subscription.topic)
                .into_iter()
                .flat_map(|entry| entry.publications.iter())
                .filter(|p| p.is_alive());
            let batched = batch.iter().filter_map(|e| match e {
                Endpoint::Publication(p) if p.topic == subscription.topic => Some(p),
                _ => None,
            });
            for publication in existing.chain(batched) {
                if !publication.restriction.permits(subscription.policy) {
                    return Err(BrokerError::IncompatibleDispatchPolicy {
                        topic: subscription.topic.clone(),
                        restriction: publication.restriction,
                        policy: subscription.policy,
                    });
                }
            }
        }

        for endpoint in batch {
            let Endpoint::Publication(publication) = endpoint else {
                continue;
            };
            let existing = self
                .topics
                .get(&publication.topic)
                .into_iter()
                .flat_map(|entry| entry.subscriptions.iter())
                .filter(|s| s.is_alive());
            for subscription in existing {
                if !publication.restriction.permits(subscription.policy) {
                    return Err(BrokerError::IncompatibleDispatchPolicy {
                        topic: publication.topic.clone(),
                        restriction: publication.restriction,
                        policy: subscription.policy,
                    });
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, endpoint: Endpoint) {
        let topic = endpoint.topic().clone();
        self.index.insert(endpoint.id(), topic.clone());
        let entry = self.topics.entry(topic).or_default();
        match endpoint {
            Endpoint::Publication(publication) => entry.publications.push(publication),
            Endpoint::Subscription(subscription) => entry.subscriptions.push(subscription),
        }
    }
}

/// Thread-safe topic registry.
///
/// Readers never block each other; writers are exclusive. No lock is held
/// while handlers or extensions run.
#[derive(Default)]
pub(crate) struct TopicRegistry {
    state: RwLock<RegistryState>,
}

impl TopicRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register every endpoint of `batch`, or none of them.
    pub(crate) fn register_all(&self, batch: Vec<Endpoint>) -> Result<(), BrokerError> {
        let mut state = self.state.write();
        state.prune(None);
        for (position, endpoint) in batch.iter().enumerate() {
            if batch[..position].iter().any(|e| e.id() == endpoint.id()) {
                return Err(BrokerError::DuplicateRegistration {
                    endpoint: endpoint.id(),
                    topic: endpoint.topic().clone(),
                });
            }
            state.claim(endpoint)?;
        }
        state.check_compatibility(&batch)?;
        for endpoint in batch {
            state.insert(endpoint);
        }
        Ok(())
    }

    /// Remove one endpoint. Returns whether it was present.
    pub(crate) fn unregister(&self, id: EndpointId) -> bool {
        let mut state = self.state.write();
        let removed = state.remove(id);
        state.prune(None);
        removed
    }

    /// Remove every endpoint of `owner`. Returns how many were removed.
    pub(crate) fn unregister_owner(&self, owner: OwnerId) -> usize {
        let mut state = self.state.write();
        let removed = state.remove_owner(owner);
        state.prune(None);
        removed
    }

    /// Snapshot of the live subscriptions of `topic`, in registration order.
    ///
    /// Seeing a dropped owner's subscription prunes the topic.
    pub(crate) fn lookup_subscriptions(&self, topic: &str) -> Vec<Arc<SubscriptionEndpoint>> {
        let (live, stale) = {
            let state = self.state.read();
            match state.topics.get(topic) {
                Some(entry) => {
                    let live: Vec<_> = entry
                        .subscriptions
                        .iter()
                        .filter(|s| s.is_alive())
                        .cloned()
                        .collect();
                    let stale = live.len() < entry.subscriptions.len();
                    (live, stale)
                }
                None => (Vec::new(), false),
            }
        };
        if stale {
            self.state.write().prune(Some(topic));
        }
        live
    }

    /// The restriction of `owner`'s publication on `topic`, if it declared one.
    pub(crate) fn publication(&self, owner: OwnerId, topic: &str) -> Option<HandlerRestriction> {
        let state = self.state.read();
        state.topics.get(topic).and_then(|entry| {
            entry
                .publications
                .iter()
                .find(|p| p.id.owner() == owner)
                .map(|p| p.restriction)
        })
    }

    pub(crate) fn topic_info(&self, topic: &str) -> TopicInfo {
        let (info, stale) = {
            let state = self.state.read();
            match state.topics.get_key_value(topic) {
                Some((name, entry)) => (entry.info(name), entry.has_dead()),
                None => (TopicInfo::unregistered(topic), false),
            }
        };
        if stale {
            self.state.write().prune(Some(topic));
        }
        info
    }

    /// Every topic with at least one live endpoint, sorted by name.
    pub(crate) fn topics(&self) -> Vec<TopicInfo> {
        let stale = self.state.read().topics.values().any(TopicEntry::has_dead);
        let state = if stale {
            let mut state = self.state.write();
            state.prune(None);
            RwLockWriteGuard::downgrade(state)
        } else {
            self.state.read()
        };
        let mut topics: Vec<TopicInfo> = state
            .topics
            .iter()
            .map(|(name, entry)| entry.info(name))
            .filter(|info| info.is_registered())
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        topics
    }

    pub(crate) fn endpoint_count(&self) -> usize {
        self.state.read().index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> (Arc<dyn Any + Send + Sync>, OwnerId) {
        let instance: Arc<dyn Any + Send + Sync> = Arc::new(0u8);
        let id = OwnerId::of(&instance);
        (instance, id)
    }

    fn publication(
        instance: &Arc<dyn Any + Send + Sync>,
        ordinal: u32,
        topic: &str,
        restriction: HandlerRestriction,
    ) -> Endpoint {
        Endpoint::Publication(PublicationEndpoint::new(
            EndpointId::new(OwnerId::of(instance), ordinal),
            topic.into(),
            restriction,
            Arc::downgrade(instance),
        ))
    }

    fn subscription(
        instance: &Arc<dyn Any + Send + Sync>,
        ordinal: u32,
        topic: &str,
        policy: DispatchPolicy,
    ) -> Endpoint {
        Endpoint::Subscription(Arc::new(SubscriptionEndpoint::new(
            EndpointId::new(OwnerId::of(instance), ordinal),
            topic.into(),
            policy,
            Arc::downgrade(instance),
            Box::new(|_: &FiredMessage| Some(Ok(()))),
        )))
    }

    #[test]
    fn lookup_follows_registration_order() {
        let registry = TopicRegistry::new();
        let (a, a_id) = owner();
        let (b, b_id) = owner();

        registry
            .register_all(vec![subscription(&b, 0, "t", DispatchPolicy::Synchronous)])
            .unwrap();
        registry
            .register_all(vec![subscription(&a, 0, "t", DispatchPolicy::Synchronous)])
            .unwrap();

        let owners: Vec<OwnerId> = registry
            .lookup_subscriptions("t")
            .iter()
            .map(|s| s.id().owner())
            .collect();
        assert_eq!(owners, vec![b_id, a_id]);
        assert!(registry.lookup_subscriptions("other").is_empty());
    }

    #[test]
    fn duplicate_endpoint_is_rejected() {
        let registry = TopicRegistry::new();
        let (a, _) = owner();

        registry
            .register_all(vec![subscription(&a, 0, "t", DispatchPolicy::Synchronous)])
            .unwrap();
        let err = registry
            .register_all(vec![subscription(&a, 0, "t", DispatchPolicy::Synchronous)])
            .unwrap_err();
        assert!(matches!(err, BrokerError::DuplicateRegistration { .. }));
        assert_eq!(registry.endpoint_count(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = TopicRegistry::new();
        let (a, a_id) = owner();

        registry
            .register_all(vec![publication(&a, 0, "t", HandlerRestriction::None)])
            .unwrap();
        assert!(registry.unregister(EndpointId::new(a_id, 0)));
        assert!(!registry.unregister(EndpointId::new(a_id, 0)));
        assert_eq!(registry.unregister_owner(a_id), 0);
        assert!(!registry.topic_info("t").is_registered());
    }

    #[test]
    fn incompatible_batch_registers_nothing() {
        let registry = TopicRegistry::new();
        let (publisher, _) = owner();
        registry
            .register_all(vec![publication(&publisher, 0, "t", HandlerRestriction::Asynchronous)])
            .unwrap();

        let (subscriber, _) = owner();
        let err = registry
            .register_all(vec![
                subscription(&subscriber, 0, "other", DispatchPolicy::Synchronous),
                subscription(&subscriber, 1, "t", DispatchPolicy::Synchronous),
            ])
            .unwrap_err();

        assert!(matches!(
            err,
            BrokerError::IncompatibleDispatchPolicy {
                restriction: HandlerRestriction::Asynchronous,
                policy: DispatchPolicy::Synchronous,
                ..
            }
        ));
        assert_eq!(registry.endpoint_count(), 1);
        assert!(registry.lookup_subscriptions("other").is_empty());
    }

    #[test]
    fn restriction_is_checked_against_existing_subscriptions() {
        let registry = TopicRegistry::new();
        let (subscriber, _) = owner();
        registry
            .register_all(vec![subscription(&subscriber, 0, "t", DispatchPolicy::Background)])
            .unwrap();

        let (publisher, _) = owner();
        assert!(
            registry
                .register_all(vec![publication(&publisher, 0, "t", HandlerRestriction::Synchronous)])
                .is_err()
        );
        registry
            .register_all(vec![publication(&publisher, 1, "t", HandlerRestriction::Asynchronous)])
            .unwrap();
    }

    #[test]
    fn dropped_owners_are_pruned_on_lookup() {
        let registry = TopicRegistry::new();
        let (a, _) = owner();
        let (b, _) = owner();
        registry
            .register_all(vec![
                subscription(&a, 0, "t", DispatchPolicy::Synchronous),
                subscription(&b, 0, "t", DispatchPolicy::Synchronous),
            ])
            .unwrap();
        drop(a);

        assert_eq!(registry.endpoint_count(), 2);
        assert_eq!(registry.lookup_subscriptions("t").len(), 1);
        assert_eq!(registry.endpoint_count(), 1);

        drop(b);
        assert!(!registry.topic_info("t").is_registered());
        assert_eq!(registry.endpoint_count(), 0);
        assert!(registry.topics().is_empty());
    }

    #[test]
    fn writes_prune_every_topic() {
        let registry = TopicRegistry::new();
        let (a, _) = owner();
        registry
            .register_all(vec![
                publication(&a, 0, "x", HandlerRestriction::Synchronous),
                subscription(&a, 1, "y", DispatchPolicy::Background),
            ])
            .unwrap();
        drop(a);

        // The dropped publication no longer constrains new subscriptions.
        let (b, _) = owner();
        registry
            .register_all(vec![subscription(&b, 0, "x", DispatchPolicy::Background)])
            .unwrap();
        assert_eq!(registry.endpoint_count(), 1);
        assert_eq!(
            registry.topics().iter().map(|t| t.name.to_string()).collect::<Vec<_>>(),
            vec!["x"]
        );

        drop(b);
        let (_c, c_id) = owner();
        assert!(!registry.unregister(EndpointId::new(c_id, 0)));
        assert_eq!(registry.endpoint_count(), 0);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_registration() {
        let registry = TopicRegistry::new();
        let (a, _) = owner();
        let (b, _) = owner();
        registry
            .register_all(vec![subscription(&a, 0, "t", DispatchPolicy::Synchronous)])
            .unwrap();

        let snapshot = registry.lookup_subscriptions("t");
        registry
            .register_all(vec![subscription(&b, 0, "t", DispatchPolicy::Synchronous)])
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.lookup_subscriptions("t").len(), 2);
    }

    #[test]
    fn topics_are_listed_by_name() {
        let registry = TopicRegistry::new();
        let (a, _) = owner();
        registry
            .register_all(vec![
                publication(&a, 0, "zeta", HandlerRestriction::None),
                subscription(&a, 1, "alpha", DispatchPolicy::Background),
            ])
            .unwrap();

        let names: Vec<String> = registry
            .topics()
            .iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(
            registry.publication(OwnerId::of(&a), "zeta"),
            Some(HandlerRestriction::None)
        );
        assert_eq!(registry.publication(OwnerId::of(&a), "alpha"), None);
    }
}
