//! Engine lifecycle contract.
//!
//! # Data Flow
//! ```text
//! Orchestrator
//!     → EngineFactory::construct(resources?, dns_cache?, config)
//!     → Engine::listen_and_serve(ready, port)   first instance
//!     → Engine::serve(ready, listener)          every instance after a reload
//!
//! Reload hand-off:
//!     old.eject_resources() → ResourceBundle
//!     → factory.construct(Some(&bundle), ...)  borrows
//!     → new.inject_resources(bundle)           moves
//!     → old.close()                            listener handed back via ServeExit
//! ```
//!
//! # Design Decisions
//! - The engine value is owned by the orchestrator alone; serving runs as a
//!   detached future that owns only what it needs
//! - The listener socket survives reloads by travelling back in ServeExit
//! - Timeouts are the engine's business; the orchestrator never aborts a construct

pub mod bundle;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::runtime::RuntimeConfig;

pub use bundle::ResourceBundle;

/// Errors reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("construct control plane: {0}")]
    Construct(String),

    #[error("listen: {0}")]
    Listen(#[from] std::io::Error),

    #[error("serve: {0}")]
    Serve(String),

    #[error("close: {0}")]
    Close(String),
}

/// What a serve future hands back when it stops.
#[derive(Debug)]
pub struct ServeExit<L> {
    /// The listening socket, if it is still usable by a successor.
    pub listener: Option<L>,
    pub result: Result<(), EngineError>,
}

/// Future that serves until the engine is closed or fails.
pub type ServeTask<L> = BoxFuture<'static, ServeExit<L>>;

/// Builds engine instances. Holds whatever the engine needs beyond the
/// configuration itself (e.g. external data directories).
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: Engine;

    /// Build an instance bound to `config`, reusing `resources` when given.
    /// The bundle is only borrowed; ownership moves on `inject_resources`.
    async fn construct(
        &self,
        resources: Option<&ResourceBundle<<Self::Engine as Engine>::Resources>>,
        dns_cache: Option<&<Self::Engine as Engine>::DnsCache>,
        config: &RuntimeConfig,
    ) -> Result<Self::Engine, EngineError>;
}

/// A running control-plane instance.
#[async_trait]
pub trait Engine: Send + 'static {
    /// Kernel-program resources that can be carried across a reload.
    type Resources: Send + Sync + 'static;
    type DnsCache: Send + Sync + 'static;
    type Listener: Send + 'static;

    /// Bind `port` and return the serve future. `ready` fires once listening.
    async fn listen_and_serve(
        &mut self,
        ready: oneshot::Sender<()>,
        port: u16,
    ) -> Result<ServeTask<Self::Listener>, EngineError>;

    /// Serve on a listener inherited from a previous instance.
    fn serve(&mut self, ready: oneshot::Sender<()>, listener: Self::Listener) -> ServeTask<Self::Listener>;

    /// Transfer resource ownership out. `None` if there is nothing to carry.
    fn eject_resources(&mut self) -> Option<ResourceBundle<Self::Resources>>;

    /// Take ownership of resources; called before the instance starts serving.
    fn inject_resources(&mut self, bundle: ResourceBundle<Self::Resources>);

    /// Copy of the DNS cache if `new` keeps the IP-version preference of `old`.
    fn clone_dns_cache_if_compatible(
        &self,
        old: &RuntimeConfig,
        new: &RuntimeConfig,
    ) -> Option<Self::DnsCache>;

    /// Stop serving. Resources already ejected are not released.
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// True if a DNS cache built under `old` is valid under `new`.
pub fn dns_cache_compatible(old: &RuntimeConfig, new: &RuntimeConfig) -> bool {
    old.dns.ip_version_prefer == new.dns.ip_version_prefer
}
