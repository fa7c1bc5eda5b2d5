//! # Feature registry and lifecycle hooks.
//!
//! [`Features`] stores long-lived service components keyed by their type or by
//! an explicit name. Components that implement [`Lifecycle`] and are added with
//! [`Features::add_managed`] also get their hooks run by
//! [`startup_all`](Features::startup_all) / [`shutdown_all`](Features::shutdown_all).
//!
//! ```text
//! add_managed(listener)   ─┐
//! add_managed(publisher)  ─┼─► startup_all():  listener → publisher → forwarder
//! add_managed(forwarder)  ─┘   shutdown_all(): forwarder → publisher → listener
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use eventvisor::Features;
//!
//! struct Greeting(&'static str);
//!
//! let mut features = Features::new();
//! features.add(Arc::new(Greeting("hello")), false).unwrap();
//! features.add_named("other", Arc::new(Greeting("hi")), false).unwrap();
//!
//! assert_eq!(features.get::<Greeting>().unwrap().0, "hello");
//! assert_eq!(features.get_named::<Greeting>("other").unwrap().0, "hi");
//! assert!(features.add(Arc::new(Greeting("again")), false).is_err());
//! ```

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FeatureError;

/// Start/stop hooks of a long-lived component.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs before the service handles traffic.
    async fn startup(&self) {}

    /// Runs when the service stops.
    async fn shutdown(&self) {}
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Keyed store of service components.
#[derive(Default)]
pub struct Features {
    entries: HashMap<String, Entry>,
    hooks: Vec<Arc<dyn Lifecycle>>,
}

impl Features {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `feature` as the default instance of its type.
    ///
    /// With `exist_ok`, an existing registration is kept and no error is raised.
    pub fn add<T: Send + Sync + 'static>(
        &mut self,
        feature: Arc<T>,
        exist_ok: bool,
    ) -> Result<(), FeatureError> {
        self.insert(type_name::<T>().to_string(), feature, exist_ok)
            .map(|_| ())
    }

    /// Registers `feature` under an explicit key.
    pub fn add_named<T: Send + Sync + 'static>(
        &mut self,
        key: impl Into<String>,
        feature: Arc<T>,
        exist_ok: bool,
    ) -> Result<(), FeatureError> {
        self.insert(key.into(), feature, exist_ok).map(|_| ())
    }

    /// Registers `feature` by type and schedules its lifecycle hooks.
    ///
    /// Hooks are only scheduled if the feature was actually inserted.
    pub fn add_managed<T: Lifecycle>(
        &mut self,
        feature: Arc<T>,
        exist_ok: bool,
    ) -> Result<(), FeatureError> {
        let entry: Entry = feature.clone();
        let inserted = self.insert(type_name::<T>().to_string(), entry, exist_ok)?;
        if inserted {
            self.hooks.push(feature);
        }
        Ok(())
    }

    fn insert(&mut self, key: String, feature: Entry, exist_ok: bool) -> Result<bool, FeatureError> {
        if self.entries.contains_key(&key) {
            return if exist_ok {
                Ok(false)
            } else {
                Err(FeatureError::Duplicate(key))
            };
        }
        self.entries.insert(key, feature);
        Ok(true)
    }

    /// Default instance of `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, FeatureError> {
        self.get_named(type_name::<T>())
    }

    /// Instance registered under `key`, checked to be a `T`.
    pub fn get_named<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, FeatureError> {
        let found = self
            .entries
            .get(key)
            .ok_or_else(|| FeatureError::Missing(key.to_string()))?;
        Arc::clone(found)
            .downcast::<T>()
            .map_err(|_| FeatureError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// True if anything is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered features.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs startup hooks in registration order.
    pub async fn startup_all(&self) {
        for hook in &self.hooks {
            debug!(feature = hook.name(), "startup");
            hook.startup().await;
        }
    }

    /// Runs shutdown hooks in reverse registration order.
    pub async fn shutdown_all(&self) {
        for hook in self.hooks.iter().rev() {
            debug!(feature = hook.name(), "shutdown");
            hook.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Lifecycle for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn startup(&self) {
            self.log.lock().unwrap().push(format!("start {}", self.name));
        }

        async fn shutdown(&self) {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
        }
    }

    #[derive(Debug)]
    struct Other;

    #[test]
    fn duplicates_and_lookups() {
        let mut features = Features::new();
        features.add(Arc::new(Other), false).unwrap();
        assert!(features.add(Arc::new(Other), true).is_ok());
        assert_eq!(
            features.add(Arc::new(Other), false).unwrap_err().as_label(),
            "feature_duplicate"
        );
        assert_eq!(features.len(), 1);

        assert_eq!(
            features.get_named::<Other>("nope").unwrap_err(),
            FeatureError::Missing("nope".into())
        );

        features.add_named("n", Arc::new(5u32), false).unwrap();
        let err = features.get_named::<Other>("n").unwrap_err();
        assert_eq!(err.as_label(), "feature_type_mismatch");
        assert_eq!(*features.get_named::<u32>("n").unwrap(), 5);
    }

    #[tokio::test]
    async fn hooks_run_in_order_and_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut features = Features::new();
        features
            .add_managed(
                Arc::new(Recorder {
                    name: "a",
                    log: Arc::clone(&log),
                }),
                false,
            )
            .unwrap();
        features
            .add_named(
                "b",
                Arc::new(Recorder {
                    name: "b",
                    log: Arc::clone(&log),
                }),
                false,
            )
            .unwrap();
        features
            .add_managed(
                Arc::new(Recorder {
                    name: "c",
                    log: Arc::clone(&log),
                }),
                true,
            )
            .unwrap();

        features.startup_all().await;
        features.shutdown_all().await;

        // `b` is unmanaged, `c` collided with `a` on the type key.
        assert_eq!(*log.lock().unwrap(), vec!["start a", "stop a"]);
    }

    #[test]
    fn managed_feature_is_retrievable_by_type() {
        let recorder = Arc::new(Recorder {
            name: "r",
            log: Arc::new(Mutex::new(Vec::new())),
        });
        let mut features = Features::new();
        features.add_managed(Arc::clone(&recorder), false).unwrap();

        let found = features.get::<Recorder>().unwrap();
        assert!(Arc::ptr_eq(&found, &recorder));
        assert_eq!(features.len(), 1);
    }
}
