//! Lock-free view of the configuration currently bound to a serving engine.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::runtime::RuntimeConfig;

/// Shared handle to the active configuration.
///
/// Written only by the orchestrator when a transition commits; any number of
/// readers may load it without blocking the reload loop.
#[derive(Debug, Clone, Default)]
pub struct ActiveConfig {
    inner: Arc<ArcSwapOption<RuntimeConfig>>,
}

impl ActiveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active configuration, if an engine is serving.
    pub fn load(&self) -> Option<Arc<RuntimeConfig>> {
        self.inner.load_full()
    }

    pub(crate) fn publish(&self, config: Arc<RuntimeConfig>) {
        self.inner.store(Some(config));
    }

    pub(crate) fn clear(&self) {
        self.inner.store(None);
    }
}
