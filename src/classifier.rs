//! The classification state machine.
//!
//! For every lifecycle event the classifier snapshots the process, looks up
//! its procdef, evaluates the statements and carries out the resulting
//! command. A `reclassify` command arms a per-pid timer; the number of
//! timers armed without an intervening group match is capped at
//! [`CGRP_RECLASSIFY_MAX`].

use ahash::AHashMap as HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::{Context, ProcessState};
use crate::error::{Error, LookupError, Result};
use crate::notify::{GroupChange, Notifier};
use crate::process::{AttributeSource, ProcAttr};
use crate::rules::{rule_eval, Command};
use crate::scheduler::{Scheduler, TimerKey};

/// Maximum number of chained reclassification rounds per process.
pub const CGRP_RECLASSIFY_MAX: u32 = 16;

/// Result of one classification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The process is now a member of `group`.
    Grouped { group: String, partition: String },
    /// The process is ignored from now on.
    Ignored,
    /// Re-evaluation armed; `attempt` counts chained rounds.
    Deferred { delay: Duration, attempt: u32 },
    /// The reclassification cap was hit; the process keeps its state.
    Exhausted,
    /// A rule exists but none of its statements matched.
    NoMatch,
    /// Neither a rule for the binary nor a fallback exists.
    NoRule,
    /// The pid is marked ignored.
    Skipped,
    /// The process could not be resolved or exited meanwhile.
    Gone,
}

/// What the rules say about a process, without acting on it.
#[derive(Debug, Clone)]
pub struct Decision {
    pub attrs: ProcAttr,
    /// Key of the procdef used, `"*"` for the fallback.
    pub rule: Option<String>,
    pub renice: i32,
    pub command: Option<Command>,
}

pub struct Classifier {
    source: Box<dyn AttributeSource>,
    notifier: Arc<dyn Notifier>,
    /// pid -> reclassify timers armed since the last group match.
    chains: HashMap<u32, u32>,
}

impl Classifier {
    pub fn new(source: Box<dyn AttributeSource>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            source,
            notifier,
            chains: HashMap::new(),
        }
    }

    /// Number of chained reclassification rounds armed for `pid`.
    pub fn attempts(&self, pid: u32) -> u32 {
        self.chains.get(&pid).copied().unwrap_or(0)
    }

    /// Snapshots `pid` and evaluates its rule. `None` if the process cannot
    /// be resolved.
    pub fn decide(&self, ctx: &Context, pid: u32, reclassify: u32) -> Option<Decision> {
        let attrs = self.source.snapshot(pid, reclassify)?;
        let binary = attrs.binary.as_deref().unwrap_or("");
        let (rule, renice, command) = match ctx.rules.lookup(binary) {
            Some(procdef) => (
                Some(procdef.binary.clone()),
                procdef.renice,
                rule_eval(procdef, &attrs).cloned(),
            ),
            None => (None, 0, None),
        };
        Some(Decision {
            attrs,
            rule,
            renice,
            command,
        })
    }

    /// Classifies `pid` in response to a lifecycle event. Supersedes any
    /// pending reclassification timer.
    pub fn classify(
        &mut self,
        ctx: &mut Context,
        sched: &mut dyn Scheduler,
        pid: u32,
    ) -> Result<Outcome> {
        self.run(ctx, sched, pid, false)
    }

    /// Classifies `pid` because its reclassification timer expired.
    pub fn reclassify(
        &mut self,
        ctx: &mut Context,
        sched: &mut dyn Scheduler,
        pid: u32,
    ) -> Result<Outcome> {
        self.run(ctx, sched, pid, true)
    }

    fn run(
        &mut self,
        ctx: &mut Context,
        sched: &mut dyn Scheduler,
        pid: u32,
        timer: bool,
    ) -> Result<Outcome> {
        if ctx.processes.is_ignored(pid) {
            return Ok(Outcome::Skipped);
        }
        if !timer && sched.cancel(TimerKey::Reclassify(pid)) {
            debug!("Pending reclassification of {} superseded", pid);
        }

        let count = self.attempts(pid);
        let Some(decision) = self.decide(ctx, pid, if timer { count } else { 0 }) else {
            debug!("Process {} could not be resolved", pid);
            return Ok(Outcome::Gone);
        };
        let binary = decision.attrs.binary.clone().unwrap_or_default();

        let Some(rule) = decision.rule.as_deref() else {
            debug!("No rule for {} ({})", pid, binary);
            return Ok(Outcome::NoRule);
        };
        let Some(command) = decision.command.clone() else {
            debug!("No statement of rule {} matched {}", rule, pid);
            return Ok(Outcome::NoMatch);
        };

        let outcome = match command {
            Command::Group(name) => self.assign(ctx, sched, pid, &binary, &name, decision.renice)?,
            Command::Ignore => {
                self.chains.remove(&pid);
                if !self.release(ctx, pid) {
                    self.remove(ctx, sched, pid);
                    return Ok(Outcome::Gone);
                }
                let old = ctx.groups.del_process(&mut ctx.processes, pid);
                ctx.processes.entry(pid, &binary).ignored = true;
                if old.is_some() {
                    self.notify(ctx, GroupChange::new(pid, &binary, old, None));
                }
                Outcome::Ignored
            }
            Command::Reclassify { delay_ms } => {
                if count >= CGRP_RECLASSIFY_MAX {
                    warn!(
                        "Reclassification of {} ({}) exhausted after {} rounds",
                        pid, binary, count
                    );
                    let current = ctx.processes.get(pid).and_then(|p| p.group.clone());
                    if let Some(name) = current {
                        if let Some(group) = ctx.groups.lookup_mut(&name) {
                            group.flags.reassign_failed = true;
                        }
                    }
                    Outcome::Exhausted
                } else {
                    let delay = Duration::from_millis(u64::from(delay_ms));
                    self.chains.insert(pid, count + 1);
                    sched.schedule_after(TimerKey::Reclassify(pid), delay);
                    Outcome::Deferred {
                        delay,
                        attempt: count + 1,
                    }
                }
            }
        };
        debug!("Classified {} ({}): {:?}", pid, binary, outcome);
        Ok(outcome)
    }

    fn assign(
        &mut self,
        ctx: &mut Context,
        sched: &mut dyn Scheduler,
        pid: u32,
        binary: &str,
        name: &str,
        renice: i32,
    ) -> Result<Outcome> {
        let Some(group) = ctx.groups.lookup(name) else {
            warn!("Rule for {} names unknown group '{}'", binary, name);
            if !self.release(ctx, pid) {
                self.remove(ctx, sched, pid);
                return Ok(Outcome::Gone);
            }
            if let Some(old) = ctx.groups.del_process(&mut ctx.processes, pid) {
                self.notify(ctx, GroupChange::new(pid, binary, Some(old), None));
            }
            return Err(LookupError::Group(name.to_string()).into());
        };
        let partition = group.partition.clone();
        let priority = group.priority;
        self.chains.remove(&pid);

        let current = ctx.processes.get(pid).and_then(|p| p.group.as_deref());
        if current == Some(name) {
            return Ok(Outcome::Grouped {
                group: name.to_string(),
                partition,
            });
        }

        match ctx.partitions.add_process(&partition, pid) {
            Ok(()) => {}
            Err(Error::ProcessGone(_)) => {
                self.remove(ctx, sched, pid);
                return Ok(Outcome::Gone);
            }
            Err(e) => return Err(e),
        }
        ctx.processes.entry(pid, binary);
        let old = ctx.groups.add_process(&mut ctx.processes, name, pid)?;
        info!(
            "Process {} ({}) -> group '{}' (partition '{}')",
            pid, binary, name, partition
        );

        let mut change = GroupChange::new(pid, binary, old, Some(name.to_string()));
        change.partition = Some(partition.clone());
        self.notify(ctx, change);

        if ctx.active_process() == Some(pid) {
            if let Err(e) = ctx.update_state(pid, ProcessState::Active) {
                warn!("Failed to refresh active group for {}: {}", pid, e);
            }
        }

        let nice = if renice != 0 { Some(renice) } else { priority };
        if let Some(nice) = nice {
            if let Err(e) = set_nice(pid, nice) {
                warn!("Failed to renice {} to {}: {}", pid, nice, e);
            }
        }

        Ok(Outcome::Grouped {
            group: name.to_string(),
            partition,
        })
    }

    /// Moves a grouped `pid` back to the root partition before it leaves
    /// its group. Returns `false` if the process exited meanwhile.
    fn release(&self, ctx: &Context, pid: u32) -> bool {
        let grouped = ctx.processes.get(pid).is_some_and(|p| p.group.is_some());
        if !grouped {
            return true;
        }
        match ctx.partitions.root().add_task(pid) {
            Ok(()) => true,
            Err(Error::ProcessGone(_)) => false,
            Err(e) => {
                warn!("Failed to move {} to the root partition: {}", pid, e);
                true
            }
        }
    }

    /// Forgets `pid` after it exited. Idempotent; returns whether anything
    /// was known about the pid.
    pub fn remove(&mut self, ctx: &mut Context, sched: &mut dyn Scheduler, pid: u32) -> bool {
        let timer = sched.cancel(TimerKey::Reclassify(pid));
        let chained = self.chains.remove(&pid).is_some();
        let binary = ctx.processes.get(pid).map(|p| p.binary.clone());
        let known = binary.is_some();
        if let Some(old) = ctx.remove_process(pid) {
            let change = GroupChange::new(pid, binary.unwrap_or_default(), Some(old), None);
            self.notify(ctx, change);
        }
        if known || timer || chained {
            debug!("Process {} removed", pid);
        }
        known || timer || chained
    }

    /// Cancels every pending reclassification and forgets all chains.
    pub fn reset(&mut self, sched: &mut dyn Scheduler) {
        sched.cancel_where(&|key| matches!(key, TimerKey::Reclassify(_)));
        self.chains.clear();
    }

    fn notify(&self, ctx: &Context, mut change: GroupChange) {
        let exported = |name: &Option<String>| {
            name.as_deref()
                .and_then(|n| ctx.groups.lookup(n))
                .is_some_and(|g| g.flags.exported)
        };
        change.exported = exported(&change.old_group) || exported(&change.new_group);
        self.notifier.group_changed(&change);
    }
}

fn set_nice(pid: u32, nice: i32) -> io::Result<()> {
    // SAFETY: setpriority only reads its scalar arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
