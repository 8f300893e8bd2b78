//! ---
//! ks_section: "03-logging"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Structured logging adapters and sinks."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
/// Emit a debug log enriched with runtime context.
#[macro_export]
macro_rules! ks_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            component = ctx.component.unwrap_or(""),
            slot = ctx.slot.unwrap_or(""),
            lane = ctx.lane.unwrap_or_default(),
            tick = ctx.tick.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ks_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an informational log enriched with runtime context.
#[macro_export]
macro_rules! ks_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            component = ctx.component.unwrap_or(""),
            slot = ctx.slot.unwrap_or(""),
            lane = ctx.lane.unwrap_or_default(),
            tick = ctx.tick.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ks_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a warning log enriched with runtime context.
#[macro_export]
macro_rules! ks_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            component = ctx.component.unwrap_or(""),
            slot = ctx.slot.unwrap_or(""),
            lane = ctx.lane.unwrap_or_default(),
            tick = ctx.tick.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ks_warn!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an error log enriched with runtime context.
#[macro_export]
macro_rules! ks_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            component = ctx.component.unwrap_or(""),
            slot = ctx.slot.unwrap_or(""),
            lane = ctx.lane.unwrap_or_default(),
            tick = ctx.tick.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ks_error!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
