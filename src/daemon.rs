//! Single-threaded event dispatch.
//!
//! The daemon owns the context and every stateful component and handles one
//! [`Event`] at a time. Handlers run to completion; timers and the lifecycle
//! feed only ever enqueue events.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, trace, warn};

use crate::classifier::{Classifier, Outcome};
use crate::context::{Context, ProcessState};
use crate::error::Result;
use crate::notify::{Notifier, PressureEvent};
use crate::process::{collect_pids, Lifecycle, ProcScanner};
use crate::scheduler::{Scheduler, TimerKey, TimerToken};
use crate::sysmon::{IoWaitMonitor, PressureKind, StatSource, SwapMonitor};

/// Something the dispatch loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new process appeared.
    Exec(u32),
    Exit(u32),
    /// The process was stopped or continued.
    StateChange(u32),
    /// Foreground state reported by an outside party.
    SetState { pid: u32, state: ProcessState },
    /// Explicit classify-by-pid request.
    Classify(u32),
    Timer { key: TimerKey, token: TimerToken },
    Reload,
    Shutdown,
}

impl From<Lifecycle> for Event {
    fn from(ev: Lifecycle) -> Self {
        match ev {
            Lifecycle::Exec(pid) => Event::Exec(pid),
            Lifecycle::Exit(pid) => Event::Exit(pid),
            Lifecycle::StateChange(pid) => Event::StateChange(pid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Produces a fresh context on reload.
pub type Reloader = Box<dyn FnMut() -> Result<Context>>;

pub struct Daemon<S: Scheduler> {
    ctx: Context,
    classifier: Classifier,
    scheduler: S,
    notifier: Arc<dyn Notifier>,
    stats: Option<Box<dyn StatSource>>,
    iowait: Option<IoWaitMonitor>,
    swap: Option<SwapMonitor>,
    scanner: Option<ProcScanner>,
    reloader: Option<Reloader>,
}

impl<S: Scheduler> Daemon<S> {
    pub fn new(
        ctx: Context,
        classifier: Classifier,
        scheduler: S,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ctx,
            classifier,
            scheduler,
            notifier,
            stats: None,
            iowait: None,
            swap: None,
            scanner: None,
            reloader: None,
        }
    }

    /// Source of /proc/stat and /proc/meminfo counters for the monitors.
    pub fn with_stats(mut self, stats: Box<dyn StatSource>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Enables the periodic /proc scan as lifecycle feed.
    pub fn with_scanner(mut self, scanner: ProcScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn with_reloader(mut self, reloader: Reloader) -> Self {
        self.reloader = Some(reloader);
        self
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Arms the periodic timers and classifies every existing process.
    pub fn start(&mut self) {
        self.arm_periodic();

        if let Some(scanner) = self.scanner.as_mut() {
            let events = scanner.scan();
            info!("Initial scan found {} process(es)", events.len());
            for ev in events {
                self.handle(ev.into());
            }
        }
    }

    fn arm_periodic(&mut self) {
        self.iowait = None;
        self.swap = None;
        self.scheduler.cancel(TimerKey::IoWait);
        self.scheduler.cancel(TimerKey::Swap);
        self.scheduler.cancel(TimerKey::Scan);

        if self.stats.is_some() {
            if let Some(cfg) = self.ctx.iowait.clone() {
                self.scheduler.schedule_periodic(TimerKey::IoWait, cfg.interval);
                self.iowait = Some(IoWaitMonitor::new(cfg));
            }
            if let Some(cfg) = self.ctx.swap.clone() {
                self.scheduler.schedule_periodic(TimerKey::Swap, cfg.interval);
                self.swap = Some(SwapMonitor::new(cfg));
            }
        } else if self.ctx.iowait.is_some() || self.ctx.swap.is_some() {
            warn!("Pressure monitors configured but no kernel statistics available");
        }

        let scan = self.ctx.options.scan_interval;
        if self.scanner.is_some() && !scan.is_zero() {
            self.scheduler.schedule_periodic(TimerKey::Scan, scan);
        }
    }

    /// Handles one event.
    pub fn handle(&mut self, event: Event) -> Flow {
        trace!("Event {:?}", event);
        match event {
            Event::Exec(pid) | Event::StateChange(pid) | Event::Classify(pid) => {
                self.classify(pid);
            }
            Event::Exit(pid) => {
                self.classifier
                    .remove(&mut self.ctx, &mut self.scheduler, pid);
                // A reused pid is then reported as new by the next pass.
                if let Some(scanner) = self.scanner.as_mut() {
                    scanner.forget(pid);
                }
            }
            Event::SetState { pid, state } => {
                if let Err(e) = self.ctx.update_state(pid, state) {
                    warn!("State change for {} ignored: {}", pid, e);
                }
            }
            Event::Timer { key, token } => {
                if !self.scheduler.fired(key, token) {
                    trace!("Stale timer {:?} token {}", key, token);
                    return Flow::Continue;
                }
                self.on_timer(key);
            }
            Event::Reload => self.reload(),
            Event::Shutdown => {
                self.shutdown();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn classify(&mut self, pid: u32) -> Option<Outcome> {
        match self
            .classifier
            .classify(&mut self.ctx, &mut self.scheduler, pid)
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Classification of {} failed: {}", pid, e);
                None
            }
        }
    }

    fn on_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::Reclassify(pid) => {
                if let Err(e) = self
                    .classifier
                    .reclassify(&mut self.ctx, &mut self.scheduler, pid)
                {
                    warn!("Reclassification of {} failed: {}", pid, e);
                }
            }
            TimerKey::IoWait => self.poll_iowait(),
            TimerKey::Swap => self.poll_swap(),
            TimerKey::Scan => {
                let events = match self.scanner.as_mut() {
                    Some(scanner) => scanner.scan(),
                    None => return,
                };
                for ev in events {
                    self.handle(ev.into());
                }
            }
        }
    }

    fn poll_iowait(&mut self) {
        let (Some(monitor), Some(stats)) = (self.iowait.as_mut(), self.stats.as_mut()) else {
            return;
        };
        match monitor.poll(stats.as_mut()) {
            Ok(Some(transition)) => {
                let event =
                    PressureEvent::new(PressureKind::IoWait, transition, &monitor.config().hook);
                self.notifier.pressure(&event);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read CPU statistics: {}", e),
        }
    }

    fn poll_swap(&mut self) {
        let now = self.scheduler.now();
        let (Some(monitor), Some(stats)) = (self.swap.as_mut(), self.stats.as_mut()) else {
            return;
        };
        match monitor.poll(stats.as_mut(), now) {
            Ok(Some(transition)) => {
                let event =
                    PressureEvent::new(PressureKind::Swap, transition, &monitor.config().hook);
                self.notifier.pressure(&event);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read swap statistics: {}", e),
        }
    }

    /// Replaces the context with a freshly loaded one. On failure the
    /// current context stays in place.
    pub fn reload(&mut self) {
        let Some(reloader) = self.reloader.as_mut() else {
            warn!("Reload requested but no configuration source is set");
            return;
        };
        let fresh = match reloader() {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Reload failed, keeping current configuration: {}", e);
                return;
            }
        };

        let mut old = std::mem::replace(&mut self.ctx, fresh);
        let names: Vec<String> = old.partitions.names().into_iter().map(String::from).collect();
        for name in names {
            let stale = old.partitions.lookup(&name).is_some_and(|p| p.is_frozen())
                && self.ctx.partitions.lookup(&name).is_none();
            if stale {
                if let Err(e) = old.partitions.freeze(&name, false) {
                    warn!("Failed to thaw dropped partition '{}': {}", name, e);
                }
            }
        }

        self.classifier.reset(&mut self.scheduler);
        self.arm_periodic();

        let pids = collect_pids(&self.ctx.options.proc_root);
        info!("Configuration reloaded, reclassifying {} process(es)", pids.len());
        for pid in pids {
            self.classify(pid);
        }
    }

    /// Cancels all timers and thaws every frozen partition.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_where(&|_| true);
        self.ctx.teardown();
        debug!("Dispatch state torn down");
    }

    /// Runs the dispatch loop until `Shutdown` or the channel closes.
    pub async fn run(mut self, mut rx: UnboundedReceiver<Event>) {
        info!("Dispatch loop started");
        while let Some(event) = rx.recv().await {
            if self.handle(event) == Flow::Stop {
                break;
            }
        }
        info!("Dispatch loop stopped");
    }
}
