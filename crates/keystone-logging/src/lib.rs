//! ---
//! ks_section: "03-logging"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Structured logging adapters and sinks."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging context and macros shared by the runtime crates.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Runtime component emitting the event (`registry`, `signals`, `timeline`).
    pub component: Option<&'a str>,
    /// Registry slot or signal type the event refers to.
    pub slot: Option<&'a str>,
    /// Timeline lane identifier.
    pub lane: Option<u64>,
    /// Scheduler tick number.
    pub tick: Option<u64>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a component name.
    pub fn with_component(mut self, component: &'a str) -> Self {
        self.component = Some(component);
        self
    }

    /// Attach a slot or signal type name.
    pub fn with_slot(mut self, slot: &'a str) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Attach a lane identifier.
    pub fn with_lane(mut self, lane: u64) -> Self {
        self.lane = Some(lane);
        self
    }

    /// Attach a tick value.
    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed but needs attention.
    Degraded,
    /// The operation failed or was aborted.
    Fault,
}

impl RuntimeEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RuntimeEventOutcome::Success => "success",
            RuntimeEventOutcome::Degraded => "degraded",
            RuntimeEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized runtime lifecycle event.
pub fn log_runtime_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: RuntimeEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    // `tracing::event!` needs a constant level per call site.
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                component = ctx.component.unwrap_or(""),
                slot = ctx.slot.unwrap_or(""),
                lane = ctx.lane.unwrap_or_default(),
                tick = ctx.tick.unwrap_or_default(),
                message = %message
            )
        };
    }
    match outcome {
        RuntimeEventOutcome::Success => emit!(Level::INFO),
        RuntimeEventOutcome::Degraded => emit!(Level::WARN),
        RuntimeEventOutcome::Fault => emit!(Level::ERROR),
    }
}
