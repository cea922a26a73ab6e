//! Classification groups and the group registry.
//!
//! A group is a named bucket of processes that is mapped onto one partition
//! at a time. The group table owns every group; membership is kept in two
//! places (the group's member list and the process's group name) and both
//! are only ever changed together by [`GroupTable::add_process`] and
//! [`GroupTable::del_process`].

use ahash::AHashMap as HashMap;
use serde::Serialize;
use std::fmt::Write as _;

use crate::error::{ConfigError, LookupError};
use crate::process::ProcessTable;

/// Sort key used for groups without an explicit priority.
pub const DEFAULT_PRIORITY: i32 = 0xffff;

/// Group flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupFlags {
    /// The group's partition is fixed by configuration.
    pub static_partition: bool,
    /// Membership changes are exported to the notification collaborator.
    pub exported: bool,
    /// Reclassification or a partition move for this group has failed.
    pub reassign_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    pub description: String,
    pub flags: GroupFlags,
    /// Member pids in attach order.
    members: Vec<u32>,
    /// Current partition. Assigned, not owned.
    pub partition: String,
    /// Explicit priority (nice value) if one was configured.
    pub priority: Option<i32>,
}

impl Group {
    pub fn new(name: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            flags: GroupFlags::default(),
            members: Vec::new(),
            partition: partition.into(),
            priority: None,
        }
    }

    pub fn members(&self) -> &[u32] {
        &self.members
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.members.contains(&pid)
    }

    /// Priority used for ordering; unset sorts after every explicit value.
    pub fn sort_priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

/// Name-keyed group registry.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: HashMap<String, Group>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group; fails if the name is taken.
    pub fn add(&mut self, group: Group) -> Result<(), ConfigError> {
        if self.groups.contains_key(&group.name) {
            return Err(ConfigError::Duplicate {
                kind: "group",
                name: group.name,
            });
        }
        self.groups.insert(group.name.clone(), group);
        Ok(())
    }

    /// Returns the named group, creating it in `partition` if it does not
    /// exist yet. Only meant for configuration loading.
    pub fn find(&mut self, name: &str, partition: &str) -> &mut Group {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name, partition))
    }

    /// Returns the named group without ever creating one.
    pub fn lookup(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    /// Moves `pid` into `group`, detaching it from its previous group first.
    /// Returns the previous group name. Nothing changes on error.
    pub fn add_process(
        &mut self,
        procs: &mut ProcessTable,
        group: &str,
        pid: u32,
    ) -> Result<Option<String>, LookupError> {
        if !self.groups.contains_key(group) {
            return Err(LookupError::Group(group.to_string()));
        }
        let process = procs.get_mut(pid).ok_or(LookupError::Process(pid))?;

        let old = process.group.take();
        if let Some(old_name) = &old {
            if let Some(old_group) = self.groups.get_mut(old_name) {
                old_group.members.retain(|&p| p != pid);
            }
        }
        process.group = Some(group.to_string());
        if let Some(new_group) = self.groups.get_mut(group) {
            if !new_group.members.contains(&pid) {
                new_group.members.push(pid);
            }
        }
        Ok(old)
    }

    /// Detaches `pid` from its group. Returns the group it left, if any.
    pub fn del_process(&mut self, procs: &mut ProcessTable, pid: u32) -> Option<String> {
        let old = procs.get_mut(pid)?.group.take()?;
        if let Some(group) = self.groups.get_mut(&old) {
            group.members.retain(|&p| p != pid);
        }
        Some(old)
    }

    /// Drops a pid from whatever member list still holds it, for processes
    /// that are already gone from the process table.
    pub fn purge_pid(&mut self, pid: u32) {
        for group in self.groups.values_mut() {
            group.members.retain(|&p| p != pid);
        }
    }

    pub fn set_priority(&mut self, name: &str, priority: Option<i32>) -> Result<(), LookupError> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| LookupError::Group(name.to_string()))?;
        group.priority = priority;
        Ok(())
    }

    /// Groups ordered by priority, explicit priorities first, then by name.
    pub fn by_priority(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.values().collect();
        groups.sort_by(|a, b| {
            a.sort_priority()
                .cmp(&b.sort_priority())
                .then_with(|| a.name.cmp(&b.name))
        });
        groups
    }

    /// Number of groups mapped onto `partition`, with or without members.
    pub fn referencing(&self, partition: &str) -> usize {
        self.groups
            .values()
            .filter(|g| g.partition == partition)
            .count()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Human readable listing of all groups.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for group in self.by_priority() {
            let _ = write!(out, "group {} -> partition {}", group.name, group.partition);
            if let Some(prio) = group.priority {
                let _ = write!(out, ", priority {prio}");
            }
            if group.flags.static_partition {
                out.push_str(", static");
            }
            if group.flags.reassign_failed {
                out.push_str(", reassign-failed");
            }
            let _ = writeln!(out, ", {} member(s)", group.members.len());
            if !group.description.is_empty() {
                let _ = writeln!(out, "    {}", group.description);
            }
        }
        out
    }
}
