// src/core/process.rs

//! Aggregated cross-host view of a single logical process.

use crate::core::messages::{ProcessInfo, ProcessStatusEvent};
use crate::core::rules::ProcessRules;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum_macros::{Display, EnumString};

/// Process lifecycle states, in the process manager's vocabulary.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unknown,
}

impl ProcessState {
    /// Whether a record in this state counts toward the running-host set.
    /// STOPPING is on its way out and does not create conflicts.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Backoff | ProcessState::Running
        )
    }
}

/// The cross-host status of one logical process, identified by
/// `application_name:process_name`. The Context owns these records; external
/// consumers only ever see snapshots.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    application_name: String,
    process_name: String,
    rules: ProcessRules,
    /// Most recent record per host of observation.
    records: BTreeMap<String, ProcessInfo>,
    /// Hosts where the process is considered running, kept in sync with records.
    running_addresses: BTreeSet<String>,
    /// Synthesized cross-host state.
    state: ProcessState,
    /// Pending restart work, consumed by the failure drain on the master.
    marked: bool,
}

impl ProcessStatus {
    pub fn new(application_name: &str, process_name: &str, rules: ProcessRules) -> Self {
        Self {
            application_name: application_name.to_string(),
            process_name: process_name.to_string(),
            rules,
            records: BTreeMap::new(),
            running_addresses: BTreeSet::new(),
            state: ProcessState::Unknown,
            marked: false,
        }
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn namespec(&self) -> String {
        format!("{}:{}", self.application_name, self.process_name)
    }

    pub fn rules(&self) -> &ProcessRules {
        &self.rules
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn running_addresses(&self) -> &BTreeSet<String> {
        &self.running_addresses
    }

    /// A conflict exists iff the process is running on more than one host.
    pub fn conflict(&self) -> bool {
        self.running_addresses.len() > 1
    }

    pub fn record(&self, address: &str) -> Option<&ProcessInfo> {
        self.records.get(address)
    }

    pub fn marked(&self) -> bool {
        self.marked
    }

    pub fn mark(&mut self) {
        self.marked = true;
    }

    pub fn clear_mark(&mut self) {
        self.marked = false;
    }

    /// Ingests a fresh record for one host. Returns true when an observable
    /// field changed; a pure heartbeat refresh (`now` only) is not observable.
    pub fn update(&mut self, address: &str, info: ProcessInfo) -> bool {
        let changed = match self.records.get(address) {
            Some(previous) => {
                previous.state != info.state
                    || previous.pid != info.pid
                    || previous.spawnerr != info.spawnerr
                    || previous.start != info.start
                    || previous.stop != info.stop
                    || previous.expected != info.expected
            }
            None => true,
        };
        self.records.insert(address.to_string(), info);
        self.refresh();
        changed
    }

    /// Drops a host from the running view after it went silent or was
    /// quarantined. The record itself is retained with an UNKNOWN state.
    pub fn invalidate_address(&mut self, address: &str) -> bool {
        let Some(record) = self.records.get_mut(address) else {
            return false;
        };
        if record.state == ProcessState::Unknown {
            return false;
        }
        record.state = ProcessState::Unknown;
        self.refresh();
        true
    }

    /// Recomputes the running set and the synthesized cross-host state.
    fn refresh(&mut self) {
        self.running_addresses = self
            .records
            .iter()
            .filter(|(_, record)| record.state.is_running())
            .map(|(address, _)| address.clone())
            .collect();

        let states: Vec<ProcessState> =
            self.records.values().map(|record| record.state).collect();
        self.state = if states.contains(&ProcessState::Running) {
            ProcessState::Running
        } else if states
            .iter()
            .any(|s| matches!(s, ProcessState::Starting | ProcessState::Backoff))
        {
            ProcessState::Starting
        } else if states.contains(&ProcessState::Stopping) {
            ProcessState::Stopping
        } else if states.contains(&ProcessState::Fatal) {
            ProcessState::Fatal
        } else if states.contains(&ProcessState::Exited) {
            ProcessState::Exited
        } else if states.contains(&ProcessState::Stopped) {
            ProcessState::Stopped
        } else {
            ProcessState::Unknown
        };
    }

    /// Whether the latest transition on `address` is a crash: a running
    /// process landing in FATAL or in EXITED without an expected exit code.
    pub fn crashed(previous: Option<ProcessState>, info: &ProcessInfo) -> bool {
        let was_running = previous.is_some_and(|s| s.is_running());
        was_running
            && (info.state == ProcessState::Fatal
                || (info.state == ProcessState::Exited && !info.expected))
    }

    /// A read-only view suitable for publication.
    pub fn snapshot(&self) -> ProcessStatusEvent {
        ProcessStatusEvent {
            application_name: self.application_name.clone(),
            process_name: self.process_name.clone(),
            state: self.state,
            addresses: self.running_addresses.iter().cloned().collect(),
            conflict: self.conflict(),
        }
    }
}
