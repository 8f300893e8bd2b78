//! ---
//! ks_section: "05-registry-runtime"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Service registry and runtime lifecycle management."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use keystone_common::{RegistryConfig, TypeKey};
use keystone_logging::{ks_debug, ks_error, ks_warn, LogContext};

use crate::error::{RegistryError, UnresolvedSlot};
use crate::slot::{Completion, DependencySet, ServiceHandle, SlotSpec, SlotState};

type Result<T> = std::result::Result<T, RegistryError>;

struct PendingSlot {
    handle: ServiceHandle,
    on_complete: Option<Completion>,
    dependencies: DependencySet,
}

#[derive(Default)]
struct RegistryState {
    // every key ever registered; only `clear` forgets them
    history: HashSet<TypeKey>,
    pending: IndexMap<TypeKey, PendingSlot>,
    complete: HashMap<TypeKey, ServiceHandle>,
}

struct Stalls {
    deadlocked: Vec<TypeKey>,
    waiting: Vec<UnresolvedSlot>,
}

/// Token for a registration; becomes true once the slot is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registering {
    key: TypeKey,
}

impl Registering {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn is_complete(&self, registry: &ServiceRegistry) -> bool {
        registry.contains(self.key)
    }
}

/// Type-keyed slots that complete once every declared dependency has.
///
/// Each registration runs resolution to a fixpoint before returning. A pass
/// collects all pending slots whose dependencies are complete, runs their
/// completion callbacks with no internal borrow held, then promotes the
/// whole batch. Callbacks may call back into the registry; registrations made
/// from a callback are picked up by the pass already running.
pub struct ServiceRegistry {
    state: RefCell<RegistryState>,
    resolving: Cell<bool>,
    strict_dependencies: bool,
}

impl ServiceRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            state: RefCell::new(RegistryState::default()),
            resolving: Cell::new(false),
            strict_dependencies: config.strict_dependencies,
        }
    }

    /// Store a slot as pending and resolve.
    ///
    /// A slot stalled on a dependency cycle yields [`RegistryError::Deadlock`].
    /// A slot waiting on a key nobody registered yet is accepted, unless
    /// strict dependencies are configured. Neither error rolls the slot back.
    pub fn register(&self, spec: SlotSpec) -> Result<Registering> {
        let SlotSpec {
            key,
            handle,
            on_complete,
            dependencies,
        } = spec;
        let ctx = LogContext::new()
            .with_component("registry")
            .with_slot(key.name());

        {
            let mut state = self.state.borrow_mut();
            if !state.history.insert(key) {
                ks_warn!(context = ctx, "duplicate registration rejected");
                return Err(RegistryError::DuplicateRegistration { key });
            }
            ks_debug!(
                context = ctx,
                "slot registered with {} dependencies",
                dependencies.len()
            );
            state.pending.insert(
                key,
                PendingSlot {
                    handle,
                    on_complete,
                    dependencies,
                },
            );
        }

        let token = Registering { key };
        if self.resolving.get() {
            return Ok(token);
        }
        self.resolve();

        if !self.state.borrow().pending.contains_key(&key) {
            return Ok(token);
        }
        let stalls = self.classify_stalls();
        if stalls.deadlocked.contains(&key) {
            ks_error!(
                context = ctx,
                "dependency cycle blocks {} slots",
                stalls.deadlocked.len()
            );
            return Err(RegistryError::Deadlock {
                slots: stalls.deadlocked,
            });
        }
        if let Some(waiting) = stalls.waiting.into_iter().find(|w| w.slot == key) {
            if self.strict_dependencies {
                ks_warn!(context = ctx, "rejected in strict mode: {}", waiting);
                return Err(RegistryError::UnresolvedDependency {
                    unresolved: vec![waiting],
                });
            }
            ks_warn!(context = ctx, "slot waiting: {}", waiting);
        }
        Ok(token)
    }

    /// Whether `key` is complete.
    pub fn contains(&self, key: TypeKey) -> bool {
        self.state.borrow().complete.contains_key(&key)
    }

    pub fn state(&self, key: TypeKey) -> Option<SlotState> {
        let state = self.state.borrow();
        if state.complete.contains_key(&key) {
            Some(SlotState::Complete)
        } else if state.pending.contains_key(&key) {
            Some(SlotState::Pending)
        } else {
            None
        }
    }

    /// Shared handle of a complete slot.
    pub fn get_handle(&self, key: TypeKey) -> Result<ServiceHandle> {
        self.state
            .borrow()
            .complete
            .get(&key)
            .cloned()
            .ok_or(RegistryError::NotRegistered { key })
    }

    pub fn get<T>(&self) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_keyed::<T>(TypeKey::of::<T>())
    }

    /// Handle registered under `key`, downcast to `T`.
    pub fn get_keyed<T>(&self, key: TypeKey) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_handle(key)?
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                key,
                expected: type_name::<T>(),
            })
    }

    /// Pending slots in registration order.
    pub fn pending(&self) -> Vec<TypeKey> {
        self.state.borrow().pending.keys().copied().collect()
    }

    /// Fail when any slot is still pending, reporting cycles first.
    pub fn ensure_resolved(&self) -> Result<()> {
        if self.state.borrow().pending.is_empty() {
            return Ok(());
        }
        let stalls = self.classify_stalls();
        if !stalls.deadlocked.is_empty() {
            return Err(RegistryError::Deadlock {
                slots: stalls.deadlocked,
            });
        }
        Err(RegistryError::UnresolvedDependency {
            unresolved: stalls.waiting,
        })
    }

    /// Forget every slot, including registration history.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.history.clear();
        state.pending.clear();
        state.complete.clear();
    }

    fn resolve(&self) {
        self.resolving.set(true);
        let _guard = ResolveGuard(&self.resolving);

        loop {
            let keys: Vec<TypeKey> = {
                let state = self.state.borrow();
                state
                    .pending
                    .iter()
                    .filter(|(_, slot)| {
                        slot.dependencies
                            .is_satisfied(|dep| state.complete.contains_key(dep))
                    })
                    .map(|(key, _)| *key)
                    .collect()
            };
            if keys.is_empty() {
                break;
            }

            // Taken one at a time so a panicking callback leaves the rest of
            // the batch pending with their callbacks intact.
            for key in &keys {
                let callback = self
                    .state
                    .borrow_mut()
                    .pending
                    .get_mut(key)
                    .and_then(|slot| slot.on_complete.take());
                if let Some(callback) = callback {
                    callback();
                }
            }

            let mut state = self.state.borrow_mut();
            for key in keys {
                // a callback may have cleared the registry
                if let Some(slot) = state.pending.shift_remove(&key) {
                    state.complete.insert(key, slot.handle);
                    ks_debug!(
                        context = LogContext::new()
                            .with_component("registry")
                            .with_slot(key.name()),
                        "slot complete"
                    );
                }
            }
        }
    }

    // A stalled slot is viable when every dependency is complete, was never
    // registered, or is itself viable. Everything else sits on or behind a
    // cycle and can never complete.
    fn classify_stalls(&self) -> Stalls {
        let state = self.state.borrow();
        let mut viable: HashSet<TypeKey> = HashSet::new();
        loop {
            let before = viable.len();
            for (key, slot) in &state.pending {
                if viable.contains(key) {
                    continue;
                }
                let reachable = slot.dependencies.iter().all(|dep| {
                    state.complete.contains_key(dep)
                        || !state.history.contains(dep)
                        || viable.contains(dep)
                });
                if reachable {
                    viable.insert(*key);
                }
            }
            if viable.len() == before {
                break;
            }
        }

        let mut stalls = Stalls {
            deadlocked: Vec::new(),
            waiting: Vec::new(),
        };
        for (key, slot) in &state.pending {
            if viable.contains(key) {
                stalls.waiting.push(UnresolvedSlot {
                    slot: *key,
                    waiting_on: slot
                        .dependencies
                        .unresolved(|dep| state.complete.contains_key(dep)),
                });
            } else {
                stalls.deadlocked.push(*key);
            }
        }
        stalls
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

struct ResolveGuard<'a>(&'a Cell<bool>);

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Weak};

    use parking_lot::ReentrantMutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Storage;
    #[derive(Debug, Default)]
    struct Cache;
    #[derive(Debug, Default)]
    struct Index;

    type Shared = Arc<ReentrantMutex<ServiceRegistry>>;

    fn shared() -> Shared {
        Arc::new(ReentrantMutex::new(ServiceRegistry::default()))
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn zero_dependency_slot_completes_and_runs_callback_once() {
        let registry = ServiceRegistry::default();
        let runs = counter();
        let seen = runs.clone();
        let token = registry
            .register(SlotSpec::new(Arc::new(Storage)).on_complete(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(token.is_complete(&registry));
        assert_eq!(registry.state(TypeKey::of::<Storage>()), Some(SlotState::Complete));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        registry.register(SlotSpec::new(Arc::new(Cache))).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_leaves_first_untouched() {
        let registry = ServiceRegistry::default();
        let first = Arc::new(Storage);
        registry.register(SlotSpec::new(first.clone())).unwrap();

        let err = registry
            .register(SlotSpec::new(Arc::new(Storage)))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateRegistration {
                key: TypeKey::of::<Storage>()
            }
        );
        let stored = registry.get::<Storage>().unwrap();
        assert!(Arc::ptr_eq(&stored, &first));
    }

    #[test]
    fn duplicate_of_pending_slot_is_rejected() {
        let registry = ServiceRegistry::default();
        registry
            .register(SlotSpec::new(Arc::new(Cache)).depends_on::<Storage>())
            .unwrap();
        assert!(matches!(
            registry.register(SlotSpec::new(Arc::new(Cache))),
            Err(RegistryError::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn dependent_completes_after_its_dependency() {
        let registry = shared();
        let weak = Arc::downgrade(&registry);
        let saw_storage = Arc::new(AtomicBool::new(false));
        let flag = saw_storage.clone();

        let guard = registry.lock();
        let token = guard
            .register(
                SlotSpec::new(Arc::new(Cache))
                    .depends_on::<Storage>()
                    .on_complete(move || {
                        if let Some(registry) = weak.upgrade() {
                            let registry = registry.lock();
                            flag.store(registry.contains(TypeKey::of::<Storage>()), Ordering::SeqCst);
                        }
                    }),
            )
            .unwrap();
        assert!(!token.is_complete(&guard));
        assert_eq!(guard.state(TypeKey::of::<Cache>()), Some(SlotState::Pending));
        assert_eq!(guard.pending(), vec![TypeKey::of::<Cache>()]);

        guard.register(SlotSpec::new(Arc::new(Storage))).unwrap();
        assert!(token.is_complete(&guard));
        assert!(saw_storage.load(Ordering::SeqCst));
        assert!(guard.pending().is_empty());
    }

    #[test]
    fn callback_does_not_see_own_slot_complete() {
        let registry = shared();
        let weak: Weak<ReentrantMutex<ServiceRegistry>> = Arc::downgrade(&registry);
        let own_complete = Arc::new(AtomicBool::new(true));
        let flag = own_complete.clone();

        registry
            .lock()
            .register(SlotSpec::new(Arc::new(Storage)).on_complete(move || {
                if let Some(registry) = weak.upgrade() {
                    let registry = registry.lock();
                    flag.store(registry.contains(TypeKey::of::<Storage>()), Ordering::SeqCst);
                }
            }))
            .unwrap();
        assert!(!own_complete.load(Ordering::SeqCst));
        assert!(registry.lock().contains(TypeKey::of::<Storage>()));
    }

    #[test]
    fn chain_resolves_in_one_registration() {
        let registry = ServiceRegistry::default();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let log = order.clone();
        registry
            .register(
                SlotSpec::new(Arc::new(Index))
                    .depends_on::<Cache>()
                    .on_complete(move || log.lock().push("index")),
            )
            .unwrap();
        let log = order.clone();
        registry
            .register(
                SlotSpec::new(Arc::new(Cache))
                    .depends_on::<Storage>()
                    .on_complete(move || log.lock().push("cache")),
            )
            .unwrap();
        assert!(order.lock().is_empty());

        let log = order.clone();
        registry
            .register(SlotSpec::new(Arc::new(Storage)).on_complete(move || log.lock().push("storage")))
            .unwrap();
        assert_eq!(*order.lock(), vec!["storage", "cache", "index"]);
        assert!(registry.ensure_resolved().is_ok());
    }

    #[test]
    fn get_reports_missing_and_pending_slots() {
        let registry = ServiceRegistry::default();
        assert_eq!(
            registry.get::<Storage>().unwrap_err(),
            RegistryError::NotRegistered {
                key: TypeKey::of::<Storage>()
            }
        );

        registry
            .register(SlotSpec::new(Arc::new(Cache)).depends_on::<Storage>())
            .unwrap();
        assert!(matches!(
            registry.get::<Cache>(),
            Err(RegistryError::NotRegistered { .. })
        ));
    }

    #[test]
    fn get_keyed_with_wrong_type_is_a_mismatch() {
        let registry = ServiceRegistry::default();
        registry
            .register(SlotSpec::with_key(TypeKey::of::<Cache>(), Arc::new(Storage)))
            .unwrap();
        assert!(registry.get_keyed::<Storage>(TypeKey::of::<Cache>()).is_ok());
        assert!(matches!(
            registry.get::<Cache>(),
            Err(RegistryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn cycle_is_reported_as_deadlock() {
        let registry = ServiceRegistry::default();
        registry
            .register(SlotSpec::new(Arc::new(Storage)).depends_on::<Cache>())
            .unwrap();
        let err = registry
            .register(SlotSpec::new(Arc::new(Cache)).depends_on::<Storage>())
            .unwrap_err();
        match err {
            RegistryError::Deadlock { slots } => {
                assert_eq!(slots, vec![TypeKey::of::<Storage>(), TypeKey::of::<Cache>()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // the registration stays
        assert_eq!(registry.state(TypeKey::of::<Cache>()), Some(SlotState::Pending));
        assert!(matches!(
            registry.ensure_resolved(),
            Err(RegistryError::Deadlock { .. })
        ));
    }

    #[test]
    fn self_dependency_is_a_deadlock() {
        let registry = ServiceRegistry::default();
        assert!(matches!(
            registry.register(SlotSpec::new(Arc::new(Storage)).depends_on::<Storage>()),
            Err(RegistryError::Deadlock { .. })
        ));
    }

    #[test]
    fn slot_behind_a_cycle_is_deadlocked() {
        let registry = ServiceRegistry::default();
        registry
            .register(SlotSpec::new(Arc::new(Storage)).depends_on::<Storage>())
            .unwrap_err();
        let err = registry
            .register(SlotSpec::new(Arc::new(Index)).depends_on::<Storage>())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Deadlock { slots } if slots.contains(&TypeKey::of::<Index>())));
    }

    #[test]
    fn strict_mode_rejects_waiting_slots() {
        let registry = ServiceRegistry::new(&RegistryConfig {
            strict_dependencies: true,
        });
        let err = registry
            .register(SlotSpec::new(Arc::new(Cache)).depends_on::<Storage>())
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnresolvedDependency {
                unresolved: vec![UnresolvedSlot {
                    slot: TypeKey::of::<Cache>(),
                    waiting_on: vec![TypeKey::of::<Storage>()],
                }]
            }
        );

        // still registered, still completes later
        registry.register(SlotSpec::new(Arc::new(Storage))).unwrap();
        assert!(registry.contains(TypeKey::of::<Cache>()));
    }

    #[test]
    fn ensure_resolved_lists_waiting_slots() {
        let registry = ServiceRegistry::default();
        registry
            .register(SlotSpec::new(Arc::new(Index)).depends_on::<Cache>())
            .unwrap();
        registry
            .register(SlotSpec::new(Arc::new(Cache)).depends_on::<Storage>())
            .unwrap();
        match registry.ensure_resolved().unwrap_err() {
            RegistryError::UnresolvedDependency { unresolved } => {
                let slots: Vec<_> = unresolved.iter().map(|u| u.slot).collect();
                assert_eq!(slots, vec![TypeKey::of::<Index>(), TypeKey::of::<Cache>()]);
                assert_eq!(unresolved[1].waiting_on, vec![TypeKey::of::<Storage>()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn registration_from_callback_joins_running_pass() {
        let registry = shared();
        let weak = Arc::downgrade(&registry);

        registry
            .lock()
            .register(SlotSpec::new(Arc::new(Storage)).on_complete(move || {
                if let Some(registry) = weak.upgrade() {
                    registry
                        .lock()
                        .register(SlotSpec::new(Arc::new(Cache)).depends_on::<Storage>())
                        .unwrap();
                }
            }))
            .unwrap();

        let guard = registry.lock();
        assert!(guard.contains(TypeKey::of::<Storage>()));
        assert!(guard.contains(TypeKey::of::<Cache>()));
    }

    #[test]
    fn clear_forgets_history() {
        let registry = ServiceRegistry::default();
        registry.register(SlotSpec::new(Arc::new(Storage))).unwrap();
        registry.clear();
        assert!(!registry.contains(TypeKey::of::<Storage>()));
        assert_eq!(registry.state(TypeKey::of::<Storage>()), None);
        registry.register(SlotSpec::new(Arc::new(Storage))).unwrap();
    }

    #[derive(Debug, Default)]
    struct Missing;
    #[derive(Debug, Default)]
    struct Audit;

    #[test]
    fn cycle_through_missing_key_is_still_a_deadlock() {
        let registry = ServiceRegistry::default();
        registry
            .register(
                SlotSpec::new(Arc::new(Storage))
                    .depends_on::<Cache>()
                    .depends_on::<Missing>(),
            )
            .unwrap();
        let err = registry
            .register(SlotSpec::new(Arc::new(Cache)).depends_on::<Storage>())
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Deadlock {
                slots: vec![TypeKey::of::<Storage>(), TypeKey::of::<Cache>()]
            }
        );
        assert!(matches!(
            registry.ensure_resolved(),
            Err(RegistryError::Deadlock { .. })
        ));

        registry.register(SlotSpec::new(Arc::new(Missing))).unwrap();
        assert_eq!(
            registry.pending(),
            vec![TypeKey::of::<Storage>(), TypeKey::of::<Cache>()]
        );
    }

    #[test]
    fn chain_ending_in_missing_key_is_waiting() {
        let registry = ServiceRegistry::default();
        registry
            .register(SlotSpec::new(Arc::new(Index)).depends_on::<Cache>())
            .unwrap();
        registry
            .register(
                SlotSpec::new(Arc::new(Cache))
                    .depends_on::<Storage>()
                    .depends_on::<Missing>(),
            )
            .unwrap();
        assert!(matches!(
            registry.ensure_resolved(),
            Err(RegistryError::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn panicking_callback_keeps_rest_of_batch_pending_with_callbacks() {
        let registry = ServiceRegistry::default();
        let runs = counter();

        registry
            .register(
                SlotSpec::new(Arc::new(Cache))
                    .depends_on::<Storage>()
                    .on_complete(|| panic!("cache failed to start")),
            )
            .unwrap();
        let seen = runs.clone();
        registry
            .register(
                SlotSpec::new(Arc::new(Index))
                    .depends_on::<Storage>()
                    .on_complete(move || {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.register(SlotSpec::new(Arc::new(Storage)))
        }));
        assert!(outcome.is_err());
        assert!(registry.contains(TypeKey::of::<Storage>()));
        assert_eq!(registry.state(TypeKey::of::<Index>()), Some(SlotState::Pending));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        registry.register(SlotSpec::new(Arc::new(Audit))).unwrap();
        assert_eq!(registry.state(TypeKey::of::<Index>()), Some(SlotState::Complete));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
