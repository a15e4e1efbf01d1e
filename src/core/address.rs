// src/core/address.rs

//! Per-peer liveness record and its guarded state transitions.

use crate::core::messages::{AddressStatusEvent, ProcessInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// The classification of a peer host, as seen by the local agent.
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
pub enum AddressState {
    /// Never heard from in this run.
    Unknown,
    /// An authorization round trip is in flight.
    Checking,
    /// Authorized and ticking.
    Running,
    /// Stopped ticking for longer than the silence timeout.
    Silent,
    /// Scheduled for quarantine; the isolation event is not yet published.
    Isolating,
    /// Terminal quarantine. No recovery within this process lifetime.
    Isolated,
}

/// The liveness record kept for every configured host, including the local one.
#[derive(Debug, Clone)]
pub struct AddressStatus {
    name: String,
    state: AddressState,
    /// Wall-clock of the sender at its last tick, in epoch seconds.
    last_remote_time: u64,
    /// Local wall-clock when that tick was received, in epoch seconds.
    last_local_time: u64,
    /// Set once an authorization reply has been processed for this host.
    checked: bool,
    /// Latest observed record per process namespec on this host.
    processes: HashMap<String, ProcessInfo>,
}

impl AddressStatus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: AddressState::Unknown,
            last_remote_time: 0,
            last_local_time: 0,
            checked: false,
            processes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AddressState {
        self.state
    }

    pub fn last_remote_time(&self) -> u64 {
        self.last_remote_time
    }

    pub fn last_local_time(&self) -> u64 {
        self.last_local_time
    }

    pub fn checked(&self) -> bool {
        self.checked
    }

    pub fn set_checked(&mut self, checked: bool) {
        self.checked = checked;
    }

    pub fn is_isolated(&self) -> bool {
        self.state == AddressState::Isolated
    }

    /// True when the host is quarantined or scheduled for quarantine.
    pub fn in_isolation(&self) -> bool {
        matches!(
            self.state,
            AddressState::Isolating | AddressState::Isolated
        )
    }

    /// Refreshes the tick timestamps for this host.
    pub fn update_times(&mut self, remote_time: u64, local_time: u64) {
        self.last_remote_time = remote_time;
        self.last_local_time = local_time;
    }

    /// Applies a state transition if it is legal, returning whether the state
    /// changed. Illegal attempts are dropped; the transition table is
    /// authoritative.
    pub fn set_state(&mut self, new_state: AddressState) -> bool {
        if new_state == self.state {
            return false;
        }
        if !Self::transition_allowed(self.state, new_state) {
            debug!(
                "Dropped illegal address transition for {}: {} -> {}",
                self.name, self.state, new_state
            );
            return false;
        }
        debug!("Address {}: {} -> {}", self.name, self.state, new_state);
        self.state = new_state;
        true
    }

    fn transition_allowed(from: AddressState, to: AddressState) -> bool {
        use AddressState::*;
        matches!(
            (from, to),
            (Unknown, Checking)
                | (Unknown, Silent)
                | (Unknown, Isolating)
                | (Checking, Running)
                | (Checking, Silent)
                | (Checking, Isolating)
                | (Running, Silent)
                | (Silent, Checking)
                | (Silent, Isolating)
                | (Isolating, Isolated)
        )
    }

    /// Force-resets the record to UNKNOWN for a new synchronization round.
    ///
    /// This bypasses the transition guard on purpose: it is only called when
    /// the FSM re-enters INITIALIZATION, and it refuses isolated hosts so the
    /// quarantine history survives.
    pub fn force_unknown(&mut self) {
        if !self.in_isolation() {
            self.state = AddressState::Unknown;
            self.checked = false;
        }
    }

    /// Stores the latest record for a process on this host.
    pub fn update_process(&mut self, info: ProcessInfo) {
        self.processes.insert(info.namespec(), info);
    }

    /// Replaces all process records with an authoritative snapshot.
    pub fn load_processes(&mut self, infos: Vec<ProcessInfo>) {
        self.processes.clear();
        for info in infos {
            self.processes.insert(info.namespec(), info);
        }
    }

    pub fn process(&self, namespec: &str) -> Option<&ProcessInfo> {
        self.processes.get(namespec)
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.processes.values()
    }

    /// A read-only view suitable for publication.
    pub fn snapshot(&self) -> AddressStatusEvent {
        AddressStatusEvent {
            address: self.name.clone(),
            state: self.state,
            last_remote_time: self.last_remote_time,
            last_local_time: self.last_local_time,
        }
    }
}
