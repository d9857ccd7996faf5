//! Single-owner kernel resource bundle.

/// Kernel-program resources lifted out of one engine instance on their way
/// into the next.
///
/// Not `Clone`: exactly one holder exists at a time. Construction of the
/// replacement engine borrows the bundle; `Engine::inject_resources` moves it.
#[derive(Debug)]
#[must_use = "dropping a bundle releases the kernel resources it holds"]
pub struct ResourceBundle<R> {
    inner: R,
}

impl<R> ResourceBundle<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get(&self) -> &R {
        &self.inner
    }

    /// Hand the resources back to the engine that now owns them.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Release the resources when no engine can take ownership.
    pub fn release(self) {
        tracing::warn!("Releasing ejected kernel resources");
        drop(self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_release_drops_resources() {
        let released = Arc::new(AtomicUsize::new(0));
        let bundle = ResourceBundle::new(Tracked(released.clone()));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        bundle.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_inner_keeps_resources() {
        let released = Arc::new(AtomicUsize::new(0));
        let bundle = ResourceBundle::new(Tracked(released.clone()));
        let inner = bundle.into_inner();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(inner);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
