//! ---
//! ks_section: "05-registry-runtime"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Service registry and runtime lifecycle management."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
//! Process-wide facade over the registry, the signal bus and the timelines.
//!
//! Every operation takes a re-entrant lock, so completion callbacks,
//! listeners, predicates and actions may call back into the runtime on the
//! same thread while other threads wait their turn.

use std::any::Any;
use std::sync::{Arc, Weak};

use keystone_common::{Predicate, PredicateRef, RuntimeConfig, TypeKey};
use keystone_logging::{ks_info, log_runtime_event, LogContext, RuntimeEventOutcome};
use keystone_rt::{Action, TickReport, TimelineId, TimelineScheduler};
use keystone_signal::{Dispatch, Signal, SignalBus, Subscription};
use once_cell::sync::Lazy;
use parking_lot::ReentrantMutex;

use crate::error::Result;
use crate::registry::ServiceRegistry;
use crate::slot::{SlotSpec, SlotState};

static GLOBAL: Lazy<Arc<Runtime>> =
    Lazy::new(|| Runtime::new(RuntimeConfig::from_env_or_default()));

struct Components {
    registry: ServiceRegistry,
    bus: SignalBus,
    timelines: TimelineScheduler,
}

impl Components {
    fn new(config: &RuntimeConfig) -> Self {
        Self {
            registry: ServiceRegistry::new(&config.registry),
            bus: SignalBus::new(&config.signals),
            timelines: TimelineScheduler::new(&config.timeline),
        }
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    inner: ReentrantMutex<Components>,
    this: Weak<Runtime>,
}

impl Runtime {
    /// Build an isolated runtime.
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let runtime = Arc::new_cyclic(|this| Self {
            inner: ReentrantMutex::new(Components::new(&config)),
            config,
            this: this.clone(),
        });
        ks_info!(
            context = LogContext::new().with_component("runtime"),
            "runtime created (strict_dependencies={}, isolate_panics={}, auto_create={})",
            runtime.config.registry.strict_dependencies,
            runtime.config.signals.isolate_panics,
            runtime.config.timeline.auto_create
        );
        runtime
    }

    /// The process-wide runtime, built on first use from `KEYSTONE_CONFIG`
    /// or the defaults.
    pub fn global() -> Arc<Runtime> {
        Arc::clone(&GLOBAL)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // -- registry --

    /// Register a slot and resolve. The returned predicate turns true once
    /// the slot is complete.
    pub fn register(&self, spec: SlotSpec) -> Result<Readiness> {
        let key = spec.key();
        self.inner.lock().registry.register(spec)?;
        Ok(self.readiness_of(key))
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.contains_key(TypeKey::of::<T>())
    }

    pub fn contains_key(&self, key: TypeKey) -> bool {
        self.inner.lock().registry.contains(key)
    }

    pub fn get<T>(&self) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Ok(self.inner.lock().registry.get::<T>()?)
    }

    pub fn get_keyed<T>(&self, key: TypeKey) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Ok(self.inner.lock().registry.get_keyed::<T>(key)?)
    }

    pub fn state<T: ?Sized + 'static>(&self) -> Option<SlotState> {
        self.inner.lock().registry.state(TypeKey::of::<T>())
    }

    pub fn pending(&self) -> Vec<TypeKey> {
        self.inner.lock().registry.pending()
    }

    pub fn ensure_resolved(&self) -> Result<()> {
        Ok(self.inner.lock().registry.ensure_resolved()?)
    }

    pub fn readiness<T: ?Sized + 'static>(&self) -> Readiness {
        self.readiness_of(TypeKey::of::<T>())
    }

    pub fn readiness_of(&self, key: TypeKey) -> Readiness {
        Readiness {
            key,
            runtime: self.this.clone(),
        }
    }

    // -- signals --

    pub fn add_listener<S, F>(&self, listener: F) -> Subscription
    where
        S: Signal,
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.add_listener_on(TypeKey::of::<S>(), listener)
    }

    pub fn add_listener_on<S, F>(&self, key: TypeKey, listener: F) -> Subscription
    where
        S: Signal,
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.inner.lock().bus.add_listener(key, listener)
    }

    pub fn try_add_listener<S, F>(&self, listener: F) -> Subscription
    where
        S: Signal,
        F: Fn(&S) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.try_add_listener_on(TypeKey::of::<S>(), listener)
    }

    pub fn try_add_listener_on<S, F>(&self, key: TypeKey, listener: F) -> Subscription
    where
        S: Signal,
        F: Fn(&S) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.lock().bus.try_add_listener(key, listener)
    }

    pub fn send<S: Signal>(&self, signal: &S) -> Result<Dispatch> {
        Ok(self.inner.lock().bus.send(signal)?)
    }

    pub fn send_to(&self, key: TypeKey, signal: &dyn Signal) -> Result<Dispatch> {
        Ok(self.inner.lock().bus.send_to(key, signal)?)
    }

    /// Idempotent; returns whether a listener was removed.
    pub fn stop_listening(&self, subscription: &Subscription) -> bool {
        self.inner.lock().bus.stop_listening(subscription)
    }

    pub fn listener_count(&self, key: TypeKey) -> usize {
        self.inner.lock().bus.listener_count(key)
    }

    // -- timelines --

    pub fn create_timeline(&self) -> TimelineId {
        self.inner.lock().timelines.create_timeline()
    }

    pub fn add_step<I>(&self, id: TimelineId, predicate: &PredicateRef, actions: I) -> Result<()>
    where
        I: IntoIterator<Item = Action>,
    {
        Ok(self.inner.lock().timelines.add_step(id, predicate, actions)?)
    }

    pub fn update_timeline(&self) -> TickReport {
        self.inner.lock().timelines.update_timeline()
    }

    pub fn reset_timeline_context(&self, id: TimelineId) -> Result<()> {
        Ok(self.inner.lock().timelines.reset(id)?)
    }

    pub fn timeline_cursor(&self, id: TimelineId) -> Result<usize> {
        Ok(self.inner.lock().timelines.cursor(id)?)
    }

    pub fn timeline_finished(&self, id: TimelineId) -> Result<bool> {
        Ok(self.inner.lock().timelines.is_finished(id)?)
    }

    // -- lifecycle --

    /// Empty registry, listeners and lanes. The instance itself survives,
    /// and subscription and timeline ids keep counting up.
    pub fn internal_reset(&self) {
        let inner = self.inner.lock();
        inner.registry.clear();
        inner.bus.clear();
        inner.timelines.clear();
        log_runtime_event(
            Some(&LogContext::new().with_component("runtime")),
            "internal_reset",
            "registry, listeners and timelines cleared",
            RuntimeEventOutcome::Success,
        );
    }
}

/// Predicate that holds once a slot is complete.
///
/// Holds a weak reference, so a predicate outliving its runtime reports
/// false instead of keeping the runtime alive.
#[derive(Debug, Clone)]
pub struct Readiness {
    key: TypeKey,
    runtime: Weak<Runtime>,
}

impl Readiness {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn is_complete(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.contains_key(self.key))
    }

    /// Wrap as a fresh timeline predicate instance.
    pub fn predicate(&self) -> PredicateRef {
        PredicateRef::new(self.clone())
    }
}

impl Predicate for Readiness {
    fn evaluate(&self) -> bool {
        self.is_complete()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
