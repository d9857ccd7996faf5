//! Shared utilities for integration testing: a scripted engine and store fixtures.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use wing::engine::{dns_cache_compatible, Engine, EngineError, EngineFactory, ResourceBundle, ServeExit, ServeTask};
use wing::runtime::RuntimeConfig;
use wing::store::{MemoryStore, ProfileKind, RecordId, Repository};

/// Counters and failure switches shared between a test and its mock engines.
#[derive(Default)]
pub struct Script {
    pub constructs: AtomicUsize,
    pub closes: AtomicUsize,
    pub injections: AtomicUsize,
    /// Constructs that were handed an ejected bundle.
    pub reused: AtomicUsize,
    /// Constructs that were handed a DNS cache.
    pub dns_carried: AtomicUsize,
    /// Kernel resources dropped, by release or by engine drop.
    pub released: AtomicUsize,
    /// `tproxy_port` of every successfully constructed config, in order.
    pub constructed: Mutex<Vec<u16>>,
    fail_ports: Mutex<HashSet<u16>>,
    construct_delay: Mutex<Option<Duration>>,
    crash: Notify,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Constructing any config with this `tproxy_port` fails.
    pub fn fail_port(&self, port: u16) {
        self.fail_ports.lock().unwrap().insert(port);
    }

    pub fn set_construct_delay(&self, delay: Duration) {
        *self.construct_delay.lock().unwrap() = Some(delay);
    }

    /// Make the current serve task stop with an error, as if the socket died.
    pub fn crash_listener(&self) {
        self.crash.notify_one();
    }

    pub fn count(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn constructed(&self) -> Vec<u16> {
        self.constructed.lock().unwrap().clone()
    }
}

/// Stand-in for the kernel program handles.
pub struct MockResources {
    script: Arc<Script>,
}

impl Drop for MockResources {
    fn drop(&mut self) {
        self.script.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct MockDnsCache {
    pub ip_version_prefer: u8,
}

#[derive(Debug)]
pub struct MockListener {
    pub port: u16,
}

pub struct MockFactory {
    script: Arc<Script>,
}

impl MockFactory {
    pub fn new(script: Arc<Script>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl EngineFactory for MockFactory {
    type Engine = MockEngine;

    async fn construct(
        &self,
        resources: Option<&ResourceBundle<MockResources>>,
        dns_cache: Option<&MockDnsCache>,
        config: &RuntimeConfig,
    ) -> Result<MockEngine, EngineError> {
        let delay = *self.script.construct_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script.constructs.fetch_add(1, Ordering::SeqCst);

        let port = config.global.tproxy_port;
        if self.script.fail_ports.lock().unwrap().contains(&port) {
            return Err(EngineError::Construct(format!("scripted failure for port {}", port)));
        }
        if resources.is_some() {
            self.script.reused.fetch_add(1, Ordering::SeqCst);
        }
        if dns_cache.is_some() {
            self.script.dns_carried.fetch_add(1, Ordering::SeqCst);
        }
        self.script.constructed.lock().unwrap().push(port);

        // A fresh engine loads its own programs; a replacement waits for injection
        let own = match resources {
            Some(_) => None,
            None => Some(ResourceBundle::new(MockResources {
                script: self.script.clone(),
            })),
        };
        Ok(MockEngine {
            script: self.script.clone(),
            ip_version_prefer: config.dns.ip_version_prefer,
            resources: own,
            stop: None,
        })
    }
}

pub struct MockEngine {
    script: Arc<Script>,
    ip_version_prefer: u8,
    resources: Option<ResourceBundle<MockResources>>,
    stop: Option<oneshot::Sender<()>>,
}

impl MockEngine {
    fn serve_task(&mut self, ready: oneshot::Sender<()>, listener: MockListener) -> ServeTask<MockListener> {
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);
        let script = self.script.clone();
        Box::pin(async move {
            let _ = ready.send(());
            tokio::select! {
                _ = stop_rx => ServeExit {
                    listener: Some(listener),
                    result: Ok(()),
                },
                _ = script.crash.notified() => ServeExit {
                    listener: None,
                    result: Err(EngineError::Serve("connection reset".into())),
                },
            }
        })
    }
}

#[async_trait]
impl Engine for MockEngine {
    type Resources = MockResources;
    type DnsCache = MockDnsCache;
    type Listener = MockListener;

    async fn listen_and_serve(
        &mut self,
        ready: oneshot::Sender<()>,
        port: u16,
    ) -> Result<ServeTask<MockListener>, EngineError> {
        Ok(self.serve_task(ready, MockListener { port }))
    }

    fn serve(&mut self, ready: oneshot::Sender<()>, listener: MockListener) -> ServeTask<MockListener> {
        self.serve_task(ready, listener)
    }

    fn eject_resources(&mut self) -> Option<ResourceBundle<MockResources>> {
        self.resources.take()
    }

    fn inject_resources(&mut self, bundle: ResourceBundle<MockResources>) {
        self.script.injections.fetch_add(1, Ordering::SeqCst);
        self.resources = Some(bundle);
    }

    fn clone_dns_cache_if_compatible(&self, old: &RuntimeConfig, new: &RuntimeConfig) -> Option<MockDnsCache> {
        dns_cache_compatible(old, new).then(|| MockDnsCache {
            ip_version_prefer: self.ip_version_prefer,
        })
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        Ok(())
    }
}

/// Runtime configuration distinguished by its port.
pub fn config(port: u16) -> Arc<RuntimeConfig> {
    let mut config = RuntimeConfig::empty();
    config.global.tproxy_port = port;
    Arc::new(config)
}

/// Ids of the records created by `seeded_store`.
pub struct Seed {
    pub global: RecordId,
    pub dns: RecordId,
    pub routing: RecordId,
    pub proxy_group: RecordId,
    pub hk_node: RecordId,
}

pub const ROUTING: &str = r#"
fallback = "proxy"

[[rules]]
condition = "domain(geosite:cn)"
outbound = "direct"
"#;

/// Store with one selected profile of each kind, a `proxy` group and two nodes.
pub fn seeded_store() -> (Arc<MemoryStore>, Seed) {
    let store = Arc::new(MemoryStore::new());
    let global = store
        .create_profile(ProfileKind::Global, "default", "tproxy_port = 12345")
        .unwrap();
    let dns = store.create_profile(ProfileKind::Dns, "default", "").unwrap();
    let routing = store.create_profile(ProfileKind::Routing, "default", ROUTING).unwrap();
    for (kind, id) in [
        (ProfileKind::Global, global.id),
        (ProfileKind::Dns, dns.id),
        (ProfileKind::Routing, routing.id),
    ] {
        store.select_profile(kind, Some(id)).unwrap();
    }

    let group = store.add_group("proxy", "min_moving_avg", Vec::new()).unwrap();
    let hk = store.add_node("hk", "socks5://10.0.0.1:1080", None).unwrap();
    let jp = store.add_node("jp", "socks5://10.0.0.2:1080", Some("jp-tag")).unwrap();
    store.attach_node(group.id, hk.id).unwrap();
    store.attach_node(group.id, jp.id).unwrap();

    let seed = Seed {
        global: global.id,
        dns: dns.id,
        routing: routing.id,
        proxy_group: group.id,
        hk_node: hk.id,
    };
    (store, seed)
}

/// Poll `f` until it returns true or a second elapses.
pub async fn eventually(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    f()
}
