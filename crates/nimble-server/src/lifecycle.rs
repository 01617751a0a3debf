//! Application component lifecycle.
//!
//! Components are registered before the server starts listening. Startup
//! runs every `init`, then every `after_init`, in registration order.
//! Shutdown runs every `before_shutdown`, then every `shutdown`, in reverse
//! registration order.

use std::sync::Arc;

use tracing::debug;

/// A unit of application state with startup and shutdown hooks.
pub trait Component: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called first at startup.
    fn init(&self) {}

    /// Called once every component has run `init`.
    fn after_init(&self) {}

    /// Called first at shutdown, while sessions may still be open.
    fn before_shutdown(&self) {}

    /// Called last; release resources here.
    fn shutdown(&self) {}
}

/// Ordered component list.
#[derive(Default, Clone)]
pub struct Components {
    list: Vec<Arc<dyn Component>>,
}

impl Components {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `component`; hooks run in registration order.
    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.list.push(component);
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Run `init` then `after_init` across all components.
    pub fn startup(&self) {
        for c in &self.list {
            debug!(component = c.name(), "init");
            c.init();
        }
        for c in &self.list {
            c.after_init();
        }
    }

    /// Run `before_shutdown` then `shutdown`, newest component first.
    pub fn shutdown(&self) {
        for c in self.list.iter().rev() {
            c.before_shutdown();
        }
        for c in self.list.iter().rev() {
            debug!(component = c.name(), "shutdown");
            c.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn record(&self, hook: &str) {
            self.log.lock().push(format!("{}.{hook}", self.name));
        }
    }

    impl Component for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn init(&self) {
            self.record("init");
        }
        fn after_init(&self) {
            self.record("after_init");
        }
        fn before_shutdown(&self) {
            self.record("before_shutdown");
        }
        fn shutdown(&self) {
            self.record("shutdown");
        }
    }

    fn registered(log: &Arc<Mutex<Vec<String>>>) -> Components {
        let mut components = Components::new();
        for name in ["a", "b"] {
            components.register(Arc::new(Recorder {
                name,
                log: log.clone(),
            }));
        }
        components
    }

    #[test]
    fn startup_runs_phases_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let components = registered(&log);
        assert_eq!(components.len(), 2);

        components.startup();
        assert_eq!(*log.lock(), ["a.init", "b.init", "a.after_init", "b.after_init"]);
    }

    #[test]
    fn shutdown_runs_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let components = registered(&log);

        components.shutdown();
        assert_eq!(
            *log.lock(),
            ["b.before_shutdown", "a.before_shutdown", "b.shutdown", "a.shutdown"]
        );
    }

    #[test]
    fn empty_is_noop() {
        let components = Components::new();
        assert!(components.is_empty());
        components.startup();
        components.shutdown();
    }
}
