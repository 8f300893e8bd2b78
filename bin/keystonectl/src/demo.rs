//! ---
//! ks_section: "06-operator-cli"
//! ks_subsection: "binary"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Operator CLI for inspecting and exercising Keystone runtimes."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
//! Scripted scenario on the global runtime.
//!
//! Lane 0 waits for `Storage` and then `Cache`. Lane 1 registers `Storage`
//! on its first step; `Cache` depends on it and announces itself over the
//! bus when it completes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use keystone_core::{action, PredicateRef, Runtime, Signal, SlotSpec, TickReport, TypeKey};
use keystone_logging::{ks_info, ks_warn, LogContext};
use serde::Serialize;

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Number of timeline ticks to run.
    #[arg(long, default_value_t = 4)]
    ticks: u32,
}

#[derive(Debug, Default)]
struct Storage;

#[derive(Debug, Default)]
struct Cache;

#[derive(Debug)]
struct SlotOnline {
    slot: &'static str,
}

impl Signal for SlotOnline {}

#[derive(Debug, Serialize)]
struct Summary {
    ticks: Vec<TickReport>,
    announcements: usize,
    pending: Vec<String>,
}

pub fn run(args: DemoArgs) -> Result<()> {
    let summary = scenario(&Runtime::global(), args.ticks)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn scenario(rt: &Arc<Runtime>, ticks: u32) -> Result<Summary> {
    let ctx = LogContext::new().with_component("demo");
    let announcements = Arc::new(AtomicUsize::new(0));

    let heard = announcements.clone();
    let subscription = rt.add_listener(move |signal: &SlotOnline| {
        heard.fetch_add(1, Ordering::SeqCst);
        ks_info!(
            context = LogContext::new().with_component("demo").with_slot(signal.slot),
            "slot online"
        );
    });

    let weak = Arc::downgrade(rt);
    rt.register(
        SlotSpec::new(Arc::new(Cache))
            .depends_on::<Storage>()
            .on_complete(move || {
                if let Some(rt) = weak.upgrade() {
                    if let Err(err) = rt.send(&SlotOnline { slot: "cache" }) {
                        ks_warn!(context = LogContext::new().with_component("demo"), "{err}");
                    }
                }
            }),
    )?;

    let gated = rt.create_timeline();
    rt.add_step(
        gated,
        &rt.readiness::<Storage>().predicate(),
        [action(|| {
            ks_info!(context = LogContext::new().with_component("demo"), "storage observed")
        })],
    )?;
    rt.add_step(
        gated,
        &rt.readiness::<Cache>().predicate(),
        [action(|| {
            ks_info!(context = LogContext::new().with_component("demo"), "cache observed")
        })],
    )?;

    let driver = rt.create_timeline();
    let weak = Arc::downgrade(rt);
    rt.add_step(
        driver,
        &PredicateRef::always(),
        [action(move || {
            let Some(rt) = weak.upgrade() else { return };
            if let Err(err) = rt.register(SlotSpec::new(Arc::new(Storage))) {
                ks_warn!(context = LogContext::new().with_component("demo"), "{err}");
            }
        })],
    )?;

    let mut reports = Vec::with_capacity(ticks as usize);
    for _ in 0..ticks {
        reports.push(rt.update_timeline());
    }

    let pending = rt
        .pending()
        .iter()
        .map(TypeKey::name)
        .map(str::to_owned)
        .collect();
    rt.stop_listening(&subscription);
    ks_info!(context = ctx, "demo finished after {} ticks", ticks);

    Ok(Summary {
        ticks: reports,
        announcements: announcements.load(Ordering::SeqCst),
        pending,
    })
}
