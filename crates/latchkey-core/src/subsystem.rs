//! Independently controllable background subsystems.
//!
//! The controller drives every [`Subsystem`] through `start` on unlock and
//! `stop` on lock. The [`SubsystemRegistry`] fixes the order: subsystems start
//! in registration order and stop in exactly the reverse order, so a
//! subsystem is always stopped before the ones it was started after.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{action::SubsystemId, error::SubsystemError};

/// A background unit with its own concurrency, opaque to the controller.
///
/// # Contract
///
/// - `start()` is idempotent. It hands off to the subsystem's own task and
///   returns without waiting for steady state.
/// - `stop()` is idempotent and never fails because the subsystem was
///   already stopped. When it returns, no further callbacks into application
///   state fire.
/// - Neither method may call back into the controller's state-mutating
///   methods.
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Start the subsystem.
    async fn start(&self) -> Result<(), SubsystemError>;

    /// Stop the subsystem and wait for quiescence.
    async fn stop(&self) -> Result<(), SubsystemError>;
}

/// Ordered set of subsystems.
#[derive(Clone, Default)]
pub struct SubsystemRegistry {
    entries: Vec<Arc<dyn Subsystem>>,
}

impl SubsystemRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subsystem to the start order.
    #[must_use]
    pub fn with(mut self, subsystem: Arc<dyn Subsystem>) -> Self {
        self.register(subsystem);
        self
    }

    /// Append a subsystem to the start order and return its ID.
    pub fn register(&mut self, subsystem: Arc<dyn Subsystem>) -> SubsystemId {
        self.entries.push(subsystem);
        SubsystemId(self.entries.len() - 1)
    }

    /// Subsystem by ID. `None` if the ID is not from this registry.
    pub fn get(&self, id: SubsystemId) -> Option<&Arc<dyn Subsystem>> {
        self.entries.get(id.0)
    }

    /// Name of a subsystem, or `"unknown"` for a foreign ID.
    pub fn name(&self, id: SubsystemId) -> &'static str {
        self.get(id).map_or("unknown", |s| s.name())
    }

    /// IDs in start order.
    pub fn start_order(&self) -> Vec<SubsystemId> {
        (0..self.entries.len()).map(SubsystemId).collect()
    }

    /// IDs in stop order (reverse of start order).
    pub fn stop_order(&self) -> Vec<SubsystemId> {
        (0..self.entries.len()).rev().map(SubsystemId).collect()
    }

    /// Number of registered subsystems.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no subsystems are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SubsystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|s| s.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Subsystem for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn start(&self) -> Result<(), SubsystemError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), SubsystemError> {
            Ok(())
        }
    }

    #[test]
    fn stop_order_reverses_start_order() {
        let registry = SubsystemRegistry::new()
            .with(Arc::new(Named("retrieval")))
            .with(Arc::new(Named("expiring")))
            .with(Arc::new(Named("view-once")));

        let start: Vec<_> = registry.start_order().into_iter().map(|id| registry.name(id)).collect();
        let stop: Vec<_> = registry.stop_order().into_iter().map(|id| registry.name(id)).collect();

        assert_eq!(start, ["retrieval", "expiring", "view-once"]);
        assert_eq!(stop, ["view-once", "expiring", "retrieval"]);
    }

    #[test]
    fn foreign_id_is_unknown() {
        let registry = SubsystemRegistry::new();
        assert!(registry.get(SubsystemId(3)).is_none());
        assert_eq!(registry.name(SubsystemId(3)), "unknown");
        assert!(registry.is_empty());
    }
}
