//! ---
//! ks_section: "02-signals"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Typed signal bus and subscription handles."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use keystone_common::{SignalConfig, TypeKey};
use keystone_logging::{ks_debug, ks_warn, LogContext};

use crate::{ListenerFailure, Result, Signal, SignalError, Subscription, SubscriptionId};

type Handler = Arc<dyn Fn(&dyn Signal) -> Outcome + Send + Sync>;

enum Outcome {
    Delivered,
    Skipped,
    Failed(anyhow::Error),
}

struct ListenerEntry {
    expects: &'static str,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    // BTreeMap keeps subscription order, which is the delivery order.
    listeners: HashMap<TypeKey, BTreeMap<SubscriptionId, ListenerEntry>>,
}

/// Summary of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Key the signal was dispatched under.
    pub signal: TypeKey,
    /// Listeners whose type matched and that handled the signal.
    pub delivered: usize,
    /// Listeners skipped because they expect a different signal type.
    pub skipped: usize,
}

/// Per-key listener sets with synchronous, FIFO fan-out.
///
/// Listeners run on the caller's thread in subscription order. A listener
/// may subscribe, unsubscribe or publish while a dispatch is in progress:
/// listeners added mid-dispatch first see the next signal, listeners removed
/// mid-dispatch are not invoked again.
pub struct SignalBus {
    state: RefCell<BusState>,
    dispatch_depth: Cell<usize>,
    isolate_panics: bool,
}

impl SignalBus {
    /// Construct a bus using the supplied dispatch policy.
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            state: RefCell::new(BusState::default()),
            dispatch_depth: Cell::new(0),
            isolate_panics: config.isolate_panics,
        }
    }

    /// Register an infallible listener for signals of type `S` under `key`.
    pub fn add_listener<S, F>(&self, key: TypeKey, listener: F) -> Subscription
    where
        S: Signal,
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.try_add_listener(key, move |signal: &S| {
            listener(signal);
            Ok(())
        })
    }

    /// Register a fallible listener; its errors are collected per dispatch.
    pub fn try_add_listener<S, F>(&self, key: TypeKey, listener: F) -> Subscription
    where
        S: Signal,
        F: Fn(&S) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler =
            Arc::new(
                move |signal: &dyn Signal| match signal.downcast_ref::<S>() {
                    Some(signal) => match listener(signal) {
                        Ok(()) => Outcome::Delivered,
                        Err(err) => Outcome::Failed(err),
                    },
                    None => Outcome::Skipped,
                },
            );

        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.listeners.entry(key).or_default().insert(
            id,
            ListenerEntry {
                expects: type_name::<S>(),
                handler,
            },
        );
        ks_debug!(
            context = LogContext::new().with_component("signals").with_slot(key.name()),
            "listener {} subscribed for {}",
            id,
            type_name::<S>()
        );
        Subscription { id, key }
    }

    /// Remove a listener. Unknown or already removed tokens are ignored.
    ///
    /// Returns whether a listener was removed by this call.
    pub fn stop_listening(&self, subscription: &Subscription) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(listeners) = state.listeners.get_mut(&subscription.key) else {
            return false;
        };
        let removed = listeners.remove(&subscription.id).is_some();
        if listeners.is_empty() {
            state.listeners.remove(&subscription.key);
        }
        removed
    }

    /// Dispatch a signal under its own type key.
    pub fn send<S: Signal>(&self, signal: &S) -> Result<Dispatch> {
        self.send_to(TypeKey::of::<S>(), signal)
    }

    /// Dispatch `signal` to every listener registered under `key`.
    ///
    /// All listeners run even when some fail; failures are reported together
    /// as [`SignalError::Dispatch`] once the fan-out is complete.
    pub fn send_to(&self, key: TypeKey, signal: &dyn Signal) -> Result<Dispatch> {
        let snapshot: Vec<(SubscriptionId, Handler)> = {
            let state = self.state.borrow();
            state
                .listeners
                .get(&key)
                .map(|listeners| {
                    listeners
                        .iter()
                        .map(|(id, entry)| (*id, Arc::clone(&entry.handler)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut dispatch = Dispatch {
            signal: key,
            delivered: 0,
            skipped: 0,
        };
        let mut failures = Vec::new();

        let depth = DepthGuard::enter(&self.dispatch_depth);
        for (id, handler) in snapshot {
            if !self.is_subscribed(key, id) {
                continue;
            }
            match self.invoke(&handler, signal) {
                Outcome::Delivered => dispatch.delivered += 1,
                Outcome::Skipped => dispatch.skipped += 1,
                Outcome::Failed(error) => {
                    ks_warn!(
                        context = LogContext::new()
                            .with_component("signals")
                            .with_slot(key.name()),
                        "listener {} failed: {:#}",
                        id,
                        error
                    );
                    failures.push(ListenerFailure {
                        subscription: id,
                        error,
                    });
                }
            }
        }
        drop(depth);

        if failures.is_empty() {
            Ok(dispatch)
        } else {
            Err(SignalError::Dispatch {
                signal: key,
                delivered: dispatch.delivered,
                failures,
            })
        }
    }

    /// Number of listeners currently registered under `key`.
    pub fn listener_count(&self, key: TypeKey) -> usize {
        self.state
            .borrow()
            .listeners
            .get(&key)
            .map_or(0, BTreeMap::len)
    }

    /// Type names the listeners under `key` expect, in delivery order.
    pub fn expected_types(&self, key: TypeKey) -> Vec<&'static str> {
        self.state
            .borrow()
            .listeners
            .get(&key)
            .map(|listeners| listeners.values().map(|entry| entry.expects).collect())
            .unwrap_or_default()
    }

    /// Whether a dispatch is currently running on this bus.
    pub fn is_dispatching(&self) -> bool {
        self.dispatch_depth.get() > 0
    }

    /// Drop every listener. Subscription ids keep increasing afterwards so
    /// stale tokens can never remove a newer listener.
    pub fn clear(&self) {
        self.state.borrow_mut().listeners.clear();
    }

    fn is_subscribed(&self, key: TypeKey, id: SubscriptionId) -> bool {
        self.state
            .borrow()
            .listeners
            .get(&key)
            .is_some_and(|listeners| listeners.contains_key(&id))
    }

    fn invoke(&self, handler: &Handler, signal: &dyn Signal) -> Outcome {
        if !self.isolate_panics {
            return handler(signal);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| handler(signal))) {
            Ok(outcome) => outcome,
            Err(payload) => Outcome::Failed(anyhow::anyhow!(
                "listener panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(&SignalConfig::default())
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use parking_lot::ReentrantMutex;

    use super::*;

    // Re-entrant access from listeners needs a shareable bus.
    type SharedBus = Arc<ReentrantMutex<SignalBus>>;

    fn shared_bus() -> SharedBus {
        Arc::new(ReentrantMutex::new(SignalBus::default()))
    }

    #[derive(Debug)]
    struct Ping(u32);
    impl Signal for Ping {}

    #[derive(Debug)]
    struct Pong;
    impl Signal for Pong {}

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (count.clone(), count)
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let bus = SignalBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.add_listener(TypeKey::of::<Ping>(), move |_: &Ping| {
                order.lock().expect("order lock").push(tag);
            });
        }

        let dispatch = bus.send(&Ping(1)).expect("dispatch");
        assert_eq!(dispatch.delivered, 3);
        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn mismatched_listener_types_are_skipped() {
        let bus = SignalBus::default();
        let (pings, probe) = counter();
        let channel = TypeKey::of::<Ping>();
        bus.add_listener(channel, move |ping: &Ping| {
            probe.fetch_add(ping.0 as usize, Ordering::SeqCst);
        });
        bus.add_listener(channel, |_: &Pong| panic!("pong listener must not run"));

        let dispatch = bus.send_to(channel, &Ping(5)).expect("dispatch");
        assert_eq!(dispatch.delivered, 1);
        assert_eq!(dispatch.skipped, 1);
        assert_eq!(pings.load(Ordering::SeqCst), 5);
        assert_eq!(
            bus.expected_types(channel).len(),
            bus.listener_count(channel)
        );
    }

    #[test]
    fn stop_listening_is_idempotent() {
        let bus = SignalBus::default();
        let (count, probe) = counter();
        let subscription = bus.add_listener(TypeKey::of::<Ping>(), move |_: &Ping| {
            probe.fetch_add(1, Ordering::SeqCst);
        });

        bus.send(&Ping(0)).expect("dispatch");
        assert!(bus.stop_listening(&subscription));
        assert!(!bus.stop_listening(&subscription));
        bus.send(&Ping(0)).expect("dispatch");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(TypeKey::of::<Ping>()), 0);
    }

    #[test]
    fn failures_are_aggregated_after_all_listeners_ran() {
        let bus = SignalBus::default();
        let (count, probe) = counter();
        let key = TypeKey::of::<Ping>();
        bus.try_add_listener(key, |_: &Ping| Err(anyhow::anyhow!("disk full")));
        bus.add_listener(key, |_: &Ping| panic!("listener exploded"));
        bus.add_listener(key, move |_: &Ping| {
            probe.fetch_add(1, Ordering::SeqCst);
        });

        let err = bus.send(&Ping(9)).expect_err("two listeners fail");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        match err {
            SignalError::Dispatch {
                signal,
                delivered,
                failures,
            } => {
                assert_eq!(signal, key);
                assert_eq!(delivered, 1);
                assert_eq!(failures.len(), 2);
                assert!(failures[0].error.to_string().contains("disk full"));
                assert!(failures[1].error.to_string().contains("listener exploded"));
            }
        }
    }

    #[test]
    fn listener_removed_mid_dispatch_is_not_invoked() {
        let bus = shared_bus();
        let (count, probe) = counter();
        let victim = Arc::new(Mutex::new(None::<Subscription>));
        let key = TypeKey::of::<Ping>();

        {
            let bus_ref = Arc::downgrade(&bus);
            let victim = victim.clone();
            bus.lock().add_listener(key, move |_: &Ping| {
                let target = *victim.lock().expect("victim lock");
                if let (Some(bus), Some(sub)) = (bus_ref.upgrade(), target) {
                    bus.lock().stop_listening(&sub);
                }
            });
        }
        let sub = bus.lock().add_listener(key, move |_: &Ping| {
            probe.fetch_add(1, Ordering::SeqCst);
        });
        *victim.lock().expect("victim lock") = Some(sub);

        let dispatch = bus.lock().send(&Ping(0)).expect("dispatch");
        assert_eq!(dispatch.delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_added_mid_dispatch_waits_for_next_signal() {
        let bus = shared_bus();
        let (count, probe) = counter();
        let key = TypeKey::of::<Ping>();
        let bus_ref = Arc::downgrade(&bus);
        bus.lock().add_listener(key, move |ping: &Ping| {
            if ping.0 != 0 {
                return;
            }
            if let Some(bus) = bus_ref.upgrade() {
                let guard = bus.lock();
                assert!(guard.is_dispatching());
                let probe = probe.clone();
                guard.add_listener(key, move |_: &Ping| {
                    probe.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        bus.lock().send(&Ping(0)).expect("first dispatch");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        bus.lock().send(&Ping(1)).expect("second dispatch");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!bus.lock().is_dispatching());
    }

    #[test]
    fn clear_keeps_subscription_ids_monotonic() {
        let bus = SignalBus::default();
        let first = bus.add_listener(TypeKey::of::<Pong>(), |_: &Pong| {});
        bus.clear();
        let second = bus.add_listener(TypeKey::of::<Pong>(), |_: &Pong| {});
        assert!(second.id() > first.id());
        assert!(!bus.stop_listening(&first));
        assert_eq!(bus.listener_count(TypeKey::of::<Pong>()), 1);
    }
}
