//! Manager slots, the capability publisher, and lazy ref-counted
//! activation.

use std::collections::HashMap;
use std::sync::Arc;

use dank_protocol::{ServerInfo, Services};
use dank_services::{ManagerError, Subscribers};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::router::{BoxFuture, ManagerDyn};

/// Every manager slot the registry holds, in capability order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Network,
    Loginctl,
    Freedesktop,
    Gamma,
    Bluetooth,
    Cups,
    Dwl,
    Brightness,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 8] = [
        ServiceKind::Network,
        ServiceKind::Loginctl,
        ServiceKind::Freedesktop,
        ServiceKind::Gamma,
        ServiceKind::Bluetooth,
        ServiceKind::Cups,
        ServiceKind::Dwl,
        ServiceKind::Brightness,
    ];

    /// Name advertised in `capabilities` and used in `subscribe`.
    pub fn capability(self) -> &'static str {
        match self {
            ServiceKind::Network => Services::NETWORK,
            ServiceKind::Loginctl => Services::LOGINCTL,
            ServiceKind::Freedesktop => Services::FREEDESKTOP,
            ServiceKind::Gamma => Services::GAMMA,
            ServiceKind::Bluetooth => Services::BLUETOOTH,
            ServiceKind::Cups => Services::CUPS,
            ServiceKind::Dwl => Services::DWL,
            ServiceKind::Brightness => Services::BRIGHTNESS,
        }
    }

    /// Method prefix owned by this slot.
    pub fn namespace(self) -> &'static str {
        match self {
            ServiceKind::Gamma => "wayland",
            other => other.capability(),
        }
    }

    /// Name used in `"<label> manager not initialized"`.
    pub fn label(self) -> &'static str {
        match self {
            ServiceKind::Gamma => "wayland",
            ServiceKind::Cups => "CUPS",
            other => other.capability(),
        }
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.namespace() == namespace)
    }

    pub fn from_capability(capability: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.capability() == capability)
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub type ManagerFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn ManagerDyn>, ManagerError>> + Send + Sync>;

/// Box an async constructor as a [`ManagerFactory`].
pub fn lazy_factory<F, Fut>(init: F) -> ManagerFactory
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn ManagerDyn>, ManagerError>> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, _> { Box::pin(init()) })
}

/// A slot that is initialized on its first subscriber and torn down after
/// its last. The mutex guards the count and serializes init and teardown.
struct LazySlot {
    factory: ManagerFactory,
    refs: Mutex<usize>,
}

/// Holds one slot per [`ServiceKind`]. A slot is either empty or holds a
/// published manager; readers may observe either at any time.
pub struct ManagerRegistry {
    slots: [RwLock<Option<Arc<dyn ManagerDyn>>>; 8],
    lazy: HashMap<ServiceKind, LazySlot>,
    capability_subscribers: Subscribers<Value>,
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| RwLock::new(None)),
            lazy: HashMap::new(),
            capability_subscribers: Subscribers::new(),
        }
    }

    /// Make `kind` lazily activated through `factory`.
    pub fn with_lazy(mut self, kind: ServiceKind, factory: ManagerFactory) -> Self {
        self.lazy.insert(
            kind,
            LazySlot {
                factory,
                refs: Mutex::new(0),
            },
        );
        self
    }

    pub fn is_lazy(&self, kind: ServiceKind) -> bool {
        self.lazy.contains_key(&kind)
    }

    pub fn get(&self, kind: ServiceKind) -> Option<Arc<dyn ManagerDyn>> {
        self.slots[kind.index()].read().clone()
    }

    pub fn is_available(&self, kind: ServiceKind) -> bool {
        self.slots[kind.index()].read().is_some()
    }

    /// Fill an empty slot and announce the new capability. A slot that is
    /// already filled keeps its manager.
    pub fn publish(&self, kind: ServiceKind, manager: Arc<dyn ManagerDyn>) -> bool {
        {
            let mut slot = self.slots[kind.index()].write();
            if slot.is_some() {
                warn!("{} manager already published", kind.label());
                return false;
            }
            *slot = Some(manager);
        }
        info!("{} manager available", kind.label());
        self.notify_capability_change();
        true
    }

    fn take(&self, kind: ServiceKind) -> Option<Arc<dyn ManagerDyn>> {
        self.slots[kind.index()].write().take()
    }

    /// `plugins` first, then every filled slot in capability order.
    pub fn capabilities(&self) -> Vec<String> {
        let mut capabilities = vec![Services::PLUGINS.to_string()];
        capabilities.extend(
            ServiceKind::ALL
                .into_iter()
                .filter(|kind| self.is_available(*kind))
                .map(|kind| kind.capability().to_string()),
        );
        capabilities
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo::new(self.capabilities())
    }

    pub fn subscribe_capabilities(&self, id: &str) -> broadcast::Receiver<Value> {
        self.capability_subscribers.subscribe(id)
    }

    pub fn unsubscribe_capabilities(&self, id: &str) {
        self.capability_subscribers.unsubscribe(id);
    }

    /// Push the current `ServerInfo` to every capability subscriber.
    pub fn notify_capability_change(&self) {
        match serde_json::to_value(self.server_info()) {
            Ok(info) => self.capability_subscribers.notify(info),
            Err(e) => warn!("Failed to encode server info: {e}"),
        }
    }

    /// Take a subscriber reference on `kind`. Lazy slots are initialized on
    /// the first reference; a failed init takes no reference. Eager slots
    /// are returned as they are.
    pub async fn acquire(&self, kind: ServiceKind) -> Option<Arc<dyn ManagerDyn>> {
        let Some(lazy) = self.lazy.get(&kind) else {
            return self.get(kind);
        };

        let mut refs = lazy.refs.lock().await;
        let manager = match self.get(kind) {
            Some(manager) => manager,
            None => match (lazy.factory)().await {
                Ok(manager) => {
                    *self.slots[kind.index()].write() = Some(manager.clone());
                    info!("{} manager initialized", kind.label());
                    self.notify_capability_change();
                    manager
                }
                Err(e) => {
                    warn!("Failed to initialize {} manager: {e}", kind.label());
                    return None;
                }
            },
        };
        *refs += 1;
        debug!("{} manager refcount: {}", kind.label(), *refs);
        Some(manager)
    }

    /// Drop a reference taken with [`acquire`](Self::acquire). The last
    /// reference on a lazy slot closes and empties it.
    pub async fn release(&self, kind: ServiceKind) {
        let Some(lazy) = self.lazy.get(&kind) else {
            return;
        };

        let mut refs = lazy.refs.lock().await;
        *refs = refs.saturating_sub(1);
        debug!("{} manager refcount: {}", kind.label(), *refs);
        if *refs > 0 {
            return;
        }

        if let Some(manager) = self.take(kind) {
            manager.close_dyn().await;
            info!("{} manager torn down (no subscribers)", kind.label());
            self.notify_capability_change();
        }
    }

    /// Empty every slot and close its manager.
    pub async fn close_all(&self) {
        for kind in ServiceKind::ALL {
            if let Some(manager) = self.take(kind) {
                manager.close_dyn().await;
                debug!("Closed {} manager", kind.label());
            }
        }
        self.capability_subscribers.clear();
        info!("All managers closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeManager;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_factory(inits: Arc<AtomicUsize>, closes: Arc<AtomicUsize>) -> ManagerFactory {
        lazy_factory(move || {
            let inits = inits.clone();
            let closes = closes.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                inits.fetch_add(1, Ordering::SeqCst);
                let manager = FakeManager::new(Services::CUPS).with_close_counter(closes);
                Ok(Arc::new(manager) as Arc<dyn ManagerDyn>)
            }
        })
    }

    #[test]
    fn kinds_map_names() {
        assert_eq!(ServiceKind::from_namespace("wayland"), Some(ServiceKind::Gamma));
        assert_eq!(ServiceKind::from_capability("gamma"), Some(ServiceKind::Gamma));
        assert_eq!(ServiceKind::from_namespace("gamma"), None);
        assert_eq!(ServiceKind::Cups.label(), "CUPS");
        assert_eq!(ServiceKind::Network.label(), "network");
        assert_eq!(ServiceKind::from_namespace("plugins"), None);
    }

    #[test]
    fn documented_methods_route_to_a_kind() {
        for (method, _) in dank_protocol::METHOD_DOCS {
            let Some((namespace, _)) = method.split_once('.') else { continue };
            if namespace == Services::PLUGINS {
                continue;
            }
            assert!(ServiceKind::from_namespace(namespace).is_some(), "{method}");
        }
    }

    #[test]
    fn capabilities_follow_filled_slots() {
        let registry = ManagerRegistry::new();
        assert_eq!(registry.capabilities(), vec!["plugins"]);

        registry.publish(ServiceKind::Brightness, Arc::new(FakeManager::new("brightness")));
        registry.publish(ServiceKind::Network, Arc::new(FakeManager::new("network")));
        assert_eq!(registry.capabilities(), vec!["plugins", "network", "brightness"]);
        assert!(!registry.publish(ServiceKind::Network, Arc::new(FakeManager::new("network"))));
    }

    #[tokio::test]
    async fn publish_notifies_capability_subscribers() {
        let registry = ManagerRegistry::new();
        let mut rx = registry.subscribe_capabilities("meta");

        registry.publish(ServiceKind::Dwl, Arc::new(FakeManager::new("dwl")));

        let info = rx.recv().await.unwrap();
        assert_eq!(info["capabilities"], serde_json::json!(["plugins", "dwl"]));
        assert_eq!(info["apiVersion"], dank_protocol::API_VERSION);
    }

    #[tokio::test]
    async fn concurrent_acquires_initialize_once() {
        let inits = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(
            ManagerRegistry::new()
                .with_lazy(ServiceKind::Cups, counting_factory(inits.clone(), closes.clone())),
        );

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.spawn(async move { registry.acquire(ServiceKind::Cups).await.is_some() });
        }
        while let Some(acquired) = tasks.join_next().await {
            assert!(acquired.unwrap());
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(registry.capabilities().contains(&"cups".to_string()));

        for _ in 0..7 {
            registry.release(ServiceKind::Cups).await;
        }
        assert!(registry.is_available(ServiceKind::Cups));
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        registry.release(ServiceKind::Cups).await;
        assert!(!registry.is_available(ServiceKind::Cups));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.capabilities(), vec!["plugins"]);
    }

    #[tokio::test]
    async fn failed_lazy_init_takes_no_reference() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let registry = ManagerRegistry::new().with_lazy(
            ServiceKind::Cups,
            lazy_factory(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<Arc<dyn ManagerDyn>, _>(ManagerError::Unavailable("lpstat".into())) }
            }),
        );

        assert!(registry.acquire(ServiceKind::Cups).await.is_none());
        assert!(registry.acquire(ServiceKind::Cups).await.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!registry.is_available(ServiceKind::Cups));
    }

    #[tokio::test]
    async fn reactivates_after_teardown() {
        let inits = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = ManagerRegistry::new()
            .with_lazy(ServiceKind::Cups, counting_factory(inits.clone(), closes.clone()));

        registry.acquire(ServiceKind::Cups).await.unwrap();
        registry.release(ServiceKind::Cups).await;
        registry.acquire(ServiceKind::Cups).await.unwrap();

        assert_eq!(inits.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eager_slots_ignore_refcounting() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = ManagerRegistry::new();
        registry.publish(
            ServiceKind::Network,
            Arc::new(FakeManager::new("network").with_close_counter(closes.clone())),
        );

        assert!(registry.acquire(ServiceKind::Network).await.is_some());
        registry.release(ServiceKind::Network).await;
        assert!(registry.is_available(ServiceKind::Network));

        registry.close_all().await;
        assert!(!registry.is_available(ServiceKind::Network));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
