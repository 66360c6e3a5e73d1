use crate::telemetry::Metrics;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

/// Tracks live streaming sessions.
///
/// Only the id counter and the live count are shared; each session's own
/// state lives in its [`StreamSession`](crate::session::StreamSession).
#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    active: AtomicUsize,
    metrics: Option<Arc<Metrics>>,
}

impl SessionRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Default::default()
        }
    }

    /// Registers a newly accepted connection. The session counts as live
    /// until the returned guard is dropped.
    pub fn open(self: &Arc<Self>) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_session_opened();
        }
        SessionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

pub struct SessionGuard {
    id: u64,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.active.fetch_sub(1, Ordering::Relaxed);
        if let Some(metrics) = &self.registry.metrics {
            metrics.record_session_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let registry = Arc::new(SessionRegistry::default());

        let first = registry.open();
        let second = registry.open();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
    }

    #[test]
    fn test_guard_drop_closes_session() {
        let registry = Arc::new(SessionRegistry::default());

        let first = registry.open();
        {
            let _second = registry.open();
            assert_eq!(registry.active_sessions(), 2);
        }
        assert_eq!(registry.active_sessions(), 1);

        drop(first);
        assert_eq!(registry.active_sessions(), 0);

        let third = registry.open();
        assert_eq!(third.id(), 3);
    }
}
