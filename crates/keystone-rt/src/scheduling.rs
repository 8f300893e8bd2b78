//! ---
//! ks_section: "04-scheduling"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Timeline scheduling helpers supporting the runtime facade."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use keystone_common::{PredicateRef, TimelineConfig};
use keystone_logging::{ks_debug, ks_warn, LogContext};
use serde::Serialize;

/// Work attached to a timeline step. Actions may run again after a reset.
pub type Action = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as an [`Action`].
pub fn action<F>(f: F) -> Action
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identifier of a timeline lane. Ids are allocated sequentially and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TimelineId(u64);

impl TimelineId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TimelineId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timeline-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("unknown timeline {0}")]
    UnknownTimeline(TimelineId),
}

pub type Result<T> = std::result::Result<T, TimelineError>;

/// A step that fired during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiredStep {
    pub timeline: TimelineId,
    pub step: usize,
    pub actions: usize,
}

/// Outcome of one [`TimelineScheduler::update_timeline`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub fired: Vec<FiredStep>,
    /// Lanes whose cursor sits past their last step after this tick.
    pub finished: usize,
    pub lanes: usize,
}

struct Step {
    predicate: PredicateRef,
    actions: Vec<Action>,
}

#[derive(Default)]
struct Lane {
    steps: Vec<Step>,
    cursor: usize,
}

impl Lane {
    fn is_finished(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    fn add_step(&mut self, predicate: PredicateRef, actions: Vec<Action>) {
        match self
            .steps
            .iter_mut()
            .find(|step| step.predicate.same_instance(&predicate))
        {
            Some(step) => step.actions.extend(actions),
            None => self.steps.push(Step { predicate, actions }),
        }
    }
}

enum Deferred {
    AddStep {
        id: TimelineId,
        predicate: PredicateRef,
        actions: Vec<Action>,
    },
    Reset(TimelineId),
}

#[derive(Default)]
struct SchedulerState {
    lanes: BTreeMap<TimelineId, Lane>,
    next_id: u64,
    tick: u64,
    deferred: Vec<Deferred>,
}

/// Independent lanes of predicate-gated steps, advanced one step per lane per tick.
///
/// Steps added with the same [`PredicateRef`] instance are merged into one
/// step; merging is by instance identity, never by what the predicate does.
/// Actions may call back into the scheduler while a tick runs: `add_step` and
/// `reset` are validated immediately and applied in call order once the tick
/// completes, and lanes created mid-tick are first ticked on the next call.
pub struct TimelineScheduler {
    state: RefCell<SchedulerState>,
    ticking: Cell<bool>,
    auto_create: bool,
}

impl TimelineScheduler {
    pub fn new(config: &TimelineConfig) -> Self {
        Self {
            state: RefCell::new(SchedulerState::default()),
            ticking: Cell::new(false),
            auto_create: config.auto_create,
        }
    }

    /// Allocate a new, empty lane.
    pub fn create_timeline(&self) -> TimelineId {
        let mut state = self.state.borrow_mut();
        let id = TimelineId(state.next_id);
        state.next_id += 1;
        state.lanes.insert(id, Lane::default());
        ks_debug!(
            context = LogContext::new()
                .with_component("timeline")
                .with_lane(id.get()),
            "timeline created"
        );
        id
    }

    /// Append a step to a lane, or merge `actions` into the step that already
    /// uses this predicate instance.
    pub fn add_step<I>(&self, id: TimelineId, predicate: &PredicateRef, actions: I) -> Result<()>
    where
        I: IntoIterator<Item = Action>,
    {
        let actions: Vec<Action> = actions.into_iter().collect();
        let mut state = self.state.borrow_mut();
        self.ensure_lane(&mut state, id)?;
        if self.ticking.get() {
            state.deferred.push(Deferred::AddStep {
                id,
                predicate: predicate.clone(),
                actions,
            });
            return Ok(());
        }
        if let Some(lane) = state.lanes.get_mut(&id) {
            lane.add_step(predicate.clone(), actions);
        }
        Ok(())
    }

    /// Rewind a lane to its first step, keeping every step.
    pub fn reset(&self, id: TimelineId) -> Result<()> {
        let mut state = self.state.borrow_mut();
        self.ensure_lane(&mut state, id)?;
        if self.ticking.get() {
            state.deferred.push(Deferred::Reset(id));
            return Ok(());
        }
        if let Some(lane) = state.lanes.get_mut(&id) {
            lane.cursor = 0;
        }
        Ok(())
    }

    /// Tick every lane once.
    ///
    /// For each lane only the step at the cursor is considered: when its
    /// predicate holds, its actions run in registration order and the cursor
    /// moves forward by one. Finished lanes are left alone.
    pub fn update_timeline(&self) -> TickReport {
        if self.ticking.get() {
            ks_warn!(
                context = LogContext::new().with_component("timeline"),
                "nested update_timeline ignored"
            );
            return TickReport {
                tick: self.state.borrow().tick,
                ..TickReport::default()
            };
        }
        // left over when a previous tick unwound through a panicking action
        self.apply_deferred();

        let (tick, lanes) = {
            let mut state = self.state.borrow_mut();
            state.tick += 1;
            (state.tick, state.lanes.keys().copied().collect::<Vec<_>>())
        };
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let guard = TickGuard::enter(&self.ticking);
        for id in lanes {
            let current = {
                let state = self.state.borrow();
                state.lanes.get(&id).and_then(|lane| {
                    lane.steps
                        .get(lane.cursor)
                        .map(|step| (lane.cursor, step.predicate.clone()))
                })
            };
            let Some((index, predicate)) = current else {
                continue;
            };
            if !predicate.evaluate() {
                continue;
            }

            let actions: Vec<Action> = {
                let state = self.state.borrow();
                state
                    .lanes
                    .get(&id)
                    .and_then(|lane| lane.steps.get(index))
                    .map(|step| step.actions.clone())
                    .unwrap_or_default()
            };
            for action in &actions {
                action();
            }

            if let Some(lane) = self.state.borrow_mut().lanes.get_mut(&id) {
                lane.cursor = index + 1;
            }
            ks_debug!(
                context = LogContext::new()
                    .with_component("timeline")
                    .with_lane(id.get())
                    .with_tick(tick),
                "step {} fired with {} action(s)",
                index,
                actions.len()
            );
            report.fired.push(FiredStep {
                timeline: id,
                step: index,
                actions: actions.len(),
            });
        }
        drop(guard);

        self.apply_deferred();
        let state = self.state.borrow();
        report.lanes = state.lanes.len();
        report.finished = state.lanes.values().filter(|lane| lane.is_finished()).count();
        report
    }

    /// Index of the step the lane will evaluate next.
    pub fn cursor(&self, id: TimelineId) -> Result<usize> {
        self.with_lane(id, |lane| lane.cursor)
    }

    pub fn step_count(&self, id: TimelineId) -> Result<usize> {
        self.with_lane(id, |lane| lane.steps.len())
    }

    pub fn is_finished(&self, id: TimelineId) -> Result<bool> {
        self.with_lane(id, Lane::is_finished)
    }

    pub fn timelines(&self) -> Vec<TimelineId> {
        self.state.borrow().lanes.keys().copied().collect()
    }

    /// Drop every lane. Ids keep increasing so stale ids stay unknown.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.lanes.clear();
        state.deferred.clear();
    }

    fn ensure_lane(&self, state: &mut SchedulerState, id: TimelineId) -> Result<()> {
        if state.lanes.contains_key(&id) {
            return Ok(());
        }
        if !self.auto_create {
            return Err(TimelineError::UnknownTimeline(id));
        }
        state.lanes.insert(id, Lane::default());
        state.next_id = state.next_id.max(id.0 + 1);
        ks_debug!(
            context = LogContext::new()
                .with_component("timeline")
                .with_lane(id.get()),
            "timeline auto-created on first use"
        );
        Ok(())
    }

    fn with_lane<T>(&self, id: TimelineId, f: impl FnOnce(&Lane) -> T) -> Result<T> {
        self.state
            .borrow()
            .lanes
            .get(&id)
            .map(f)
            .ok_or(TimelineError::UnknownTimeline(id))
    }

    fn apply_deferred(&self) {
        let mut state = self.state.borrow_mut();
        let deferred = std::mem::take(&mut state.deferred);
        for op in deferred {
            match op {
                Deferred::AddStep {
                    id,
                    predicate,
                    actions,
                } => {
                    if let Some(lane) = state.lanes.get_mut(&id) {
                        lane.add_step(predicate, actions);
                    }
                }
                Deferred::Reset(id) => {
                    if let Some(lane) = state.lanes.get_mut(&id) {
                        lane.cursor = 0;
                    }
                }
            }
        }
    }
}

impl Default for TimelineScheduler {
    fn default() -> Self {
        Self::new(&TimelineConfig::default())
    }
}

struct TickGuard<'a>(&'a Cell<bool>);

impl<'a> TickGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
