// src/core/context.rs

//! The Context owns the membership set and the process catalog, and is the
//! single ingress for ticks, process events and authorization replies. All
//! mutation happens on the agent task; every outside view is a snapshot.

use crate::core::address::{AddressState, AddressStatus};
use crate::core::application::{ApplicationSnapshot, ApplicationStatus};
use crate::core::events::EventBus;
use crate::core::messages::{ProcessInfo, RequestPusher};
use crate::core::process::ProcessStatus;
use crate::core::rules::{RulesBook, RunningFailureStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a process event amounted to, returned to the agent so it can feed the
/// failure handler. `None` means no observable field changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEventOutcome {
    pub namespec: String,
    pub application_name: String,
    pub crashed: bool,
    pub running_failure_strategy: RunningFailureStrategy,
}

pub struct Context {
    local_address: String,
    silence_timeout: u64,
    auto_fence: bool,
    addresses: BTreeMap<String, AddressStatus>,
    applications: BTreeMap<String, ApplicationStatus>,
    processes: BTreeMap<String, ProcessStatus>,
    rules: RulesBook,
    bus: Arc<EventBus>,
    requests: RequestPusher,
}

impl Context {
    pub fn new(
        address_list: &[String],
        local_address: &str,
        silence_timeout: u64,
        auto_fence: bool,
        rules: RulesBook,
        bus: Arc<EventBus>,
        requests: RequestPusher,
    ) -> Self {
        let addresses = address_list
            .iter()
            .map(|name| (name.clone(), AddressStatus::new(name)))
            .collect();
        Self {
            local_address: local_address.to_string(),
            silence_timeout,
            auto_fence,
            addresses,
            applications: BTreeMap::new(),
            processes: BTreeMap::new(),
            rules,
            bus,
            requests,
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn address(&self, name: &str) -> Option<&AddressStatus> {
        self.addresses.get(name)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &AddressStatus> {
        self.addresses.values()
    }

    pub fn process(&self, namespec: &str) -> Option<&ProcessStatus> {
        self.processes.get(namespec)
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessStatus> {
        self.processes.values()
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationStatus> {
        self.applications.get(name)
    }

    // --- membership queries ---

    /// RUNNING hosts in lexical order.
    pub fn running_addresses(&self) -> Vec<String> {
        self.addresses_in(&[AddressState::Running])
    }

    /// Hosts not yet classified: UNKNOWN, or CHECKING with the authorization
    /// round trip still in flight.
    pub fn unknown_addresses(&self) -> Vec<String> {
        self.addresses_in(&[AddressState::Unknown, AddressState::Checking])
    }

    fn addresses_in(&self, states: &[AddressState]) -> Vec<String> {
        self.addresses
            .values()
            .filter(|status| states.contains(&status.state()))
            .map(|status| status.name().to_string())
            .collect()
    }

    pub fn local_running(&self) -> bool {
        self.is_address_running(&self.local_address)
    }

    pub fn is_address_running(&self, name: &str) -> bool {
        self.addresses
            .get(name)
            .is_some_and(|status| status.state() == AddressState::Running)
    }

    /// The master is the lexicographically smallest RUNNING address. This is
    /// deterministic on every agent that observes the same RUNNING set.
    pub fn elect_master(&self) -> Option<String> {
        self.running_addresses().into_iter().next()
    }

    // --- conflict queries ---

    pub fn conflicts(&self) -> Vec<&ProcessStatus> {
        self.processes.values().filter(|p| p.conflict()).collect()
    }

    pub fn conflicting(&self) -> bool {
        self.processes.values().any(|p| p.conflict())
    }

    // --- failure marks ---

    pub fn mark_process(&mut self, namespec: &str) {
        if let Some(process) = self.processes.get_mut(namespec) {
            process.mark();
        }
    }

    pub fn marked_processes(&self) -> Vec<&ProcessStatus> {
        self.processes.values().filter(|p| p.marked()).collect()
    }

    pub fn clear_marks(&mut self) {
        for process in self.processes.values_mut() {
            process.clear_mark();
        }
    }

    // --- event ingress ---

    /// Ingests a heartbeat from a peer (or from the local agent itself).
    pub fn on_tick_event(&mut self, address: &str, when: u64, now: u64) {
        let local = address == self.local_address;
        let Some(status) = self.addresses.get_mut(address) else {
            warn!("Dropped tick from unknown address '{address}'.");
            return;
        };
        if status.in_isolation() {
            debug!("Ignored tick from isolated address '{address}'.");
            return;
        }
        status.update_times(when, now);

        let changed = match status.state() {
            AddressState::Unknown | AddressState::Silent if local => {
                // The local host vouches for itself; no RPC round trip.
                status.set_state(AddressState::Checking);
                status.set_checked(true);
                status.set_state(AddressState::Running)
            }
            AddressState::Unknown | AddressState::Silent => {
                let changed = status.set_state(AddressState::Checking);
                self.requests.check_address(address);
                changed
            }
            _ => false,
        };
        if changed {
            self.publish_address(address);
        }
    }

    /// Ages out silent peers. Hosts already SILENT are fenced when auto-fencing
    /// is enabled; hosts that stopped ticking are newly marked SILENT. The
    /// one-tick gap between the two is deliberate.
    pub fn on_timer_event(&mut self, now: u64) {
        let names: Vec<String> = self.addresses.keys().cloned().collect();
        for name in names {
            let state = self.addresses[&name].state();
            match state {
                AddressState::Silent => {
                    if self.auto_fence {
                        self.transition_address(&name, AddressState::Isolating);
                    }
                }
                AddressState::Checking | AddressState::Running => {
                    let last = self.addresses[&name].last_local_time();
                    if now.saturating_sub(last) > self.silence_timeout {
                        info!("Address '{name}' stopped ticking; marking SILENT.");
                        self.transition_address(&name, AddressState::Silent);
                        self.invalidate_address_processes(&name);
                    }
                }
                _ => {}
            }
        }
    }

    /// Ingests a process state change observed on a host. Returns the outcome
    /// only when an observable field changed; that return value is the
    /// deployer's trigger for incremental work.
    pub fn on_process_event(
        &mut self,
        address: &str,
        info: ProcessInfo,
    ) -> Option<ProcessEventOutcome> {
        let Some(status) = self.addresses.get_mut(address) else {
            warn!("Dropped process event from unknown address '{address}'.");
            return None;
        };
        if status.in_isolation() {
            debug!("Ignored process event from isolated address '{address}'.");
            return None;
        }
        status.update_process(info.clone());

        let namespec = info.namespec();
        let application_name = info.group.clone();
        self.ensure_process(&application_name, &info.name);

        let process = self
            .processes
            .get_mut(&namespec)
            .expect("Invariant violation: process record created on first observation");
        let previous = process.record(address).map(|record| record.state);
        let crashed = ProcessStatus::crashed(previous, &info);
        let strategy = process.rules().running_failure_strategy;
        if !process.update(address, info) {
            return None;
        }

        self.publish_process(&namespec);
        self.refresh_application(&application_name);
        Some(ProcessEventOutcome {
            namespec,
            application_name,
            crashed,
            running_failure_strategy: strategy,
        })
    }

    /// Completes a CHECK_ADDRESS round trip. A positive reply adopts the
    /// supplied process list as the authoritative snapshot for that host; a
    /// negative reply schedules quarantine.
    pub fn on_authorization(
        &mut self,
        address: &str,
        authorized: bool,
        processes: Vec<ProcessInfo>,
        now: u64,
    ) {
        let Some(status) = self.addresses.get_mut(address) else {
            warn!("Dropped authorization for unknown address '{address}'.");
            return;
        };
        if status.state() != AddressState::Checking {
            debug!(
                "Ignored stale authorization for '{address}' in state {}.",
                status.state()
            );
            return;
        }
        if !authorized {
            info!("Address '{address}' refused authorization; isolating.");
            self.transition_address(address, AddressState::Isolating);
            self.invalidate_address_processes(address);
            return;
        }

        info!("Address '{address}' authorized.");
        let remote = status.last_remote_time();
        status.set_checked(true);
        status.update_times(remote, now);
        status.load_processes(processes.clone());
        if status.set_state(AddressState::Running) {
            self.publish_address(address);
        }
        for info in processes {
            let namespec = info.namespec();
            let application_name = info.group.clone();
            self.ensure_process(&application_name, &info.name);
            let process = self
                .processes
                .get_mut(&namespec)
                .expect("Invariant violation: process record created on first observation");
            if process.update(address, info) {
                self.publish_process(&namespec);
                self.refresh_application(&application_name);
            }
        }
    }

    // --- synchronization side effects ---

    /// Classifies every host still UNKNOWN when INITIALIZATION ends: SILENT,
    /// and straight on to ISOLATING when auto-fencing.
    pub fn end_synchro(&mut self) {
        let names: Vec<String> = self.addresses.keys().cloned().collect();
        for name in names {
            if self.addresses[&name].state() == AddressState::Unknown {
                self.transition_address(&name, AddressState::Silent);
                if self.auto_fence {
                    self.transition_address(&name, AddressState::Isolating);
                }
            }
        }
    }

    /// Seals every ISOLATING host and returns the newly isolated addresses so
    /// the transport can tear down its connections. The status publication
    /// happens before the state is sealed.
    pub fn handle_isolation(&mut self) -> Vec<String> {
        let isolating: Vec<String> = self.addresses_in(&[AddressState::Isolating]);
        for name in &isolating {
            self.publish_address(name);
            let status = self
                .addresses
                .get_mut(name)
                .expect("Invariant violation: address records are never deleted");
            status.set_state(AddressState::Isolated);
        }
        if !isolating.is_empty() {
            info!("Isolated addresses: {:?}", isolating);
        }
        isolating
    }

    /// Force-resets every non-isolated host for a new synchronization round.
    pub fn reset_addresses(&mut self) {
        for status in self.addresses.values_mut() {
            status.force_unknown();
        }
    }

    /// Refreshes every application state and returns the deployable views in
    /// start-sequence order.
    pub fn deployment_snapshots(&mut self) -> Vec<ApplicationSnapshot> {
        let names: Vec<String> = self.applications.keys().cloned().collect();
        for name in names {
            self.refresh_application(&name);
        }
        let mut snapshots: Vec<ApplicationSnapshot> = self
            .applications
            .values()
            .map(|app| app.deployment_snapshot())
            .collect();
        snapshots.sort_by(|a, b| {
            a.start_sequence
                .cmp(&b.start_sequence)
                .then_with(|| a.name.cmp(&b.name))
        });
        snapshots
    }

    // --- internals ---

    /// Lazily creates the process and application records on first observation.
    fn ensure_process(&mut self, application_name: &str, process_name: &str) {
        let namespec = format!("{application_name}:{process_name}");
        if !self.processes.contains_key(&namespec) {
            let rules = self.rules.process_rules(&namespec);
            self.processes.insert(
                namespec.clone(),
                ProcessStatus::new(application_name, process_name, rules),
            );
        }
        let application = self
            .applications
            .entry(application_name.to_string())
            .or_insert_with(|| {
                ApplicationStatus::new(
                    application_name,
                    self.rules.application_rules(application_name),
                )
            });
        application.add_process(&namespec);
    }

    fn transition_address(&mut self, name: &str, state: AddressState) {
        if let Some(status) = self.addresses.get_mut(name) {
            if status.set_state(state) {
                self.publish_address(name);
            }
        }
    }

    /// Drops a vanished host from every process's running view.
    fn invalidate_address_processes(&mut self, address: &str) {
        let namespecs: Vec<String> = self.processes.keys().cloned().collect();
        for namespec in namespecs {
            let process = self
                .processes
                .get_mut(&namespec)
                .expect("Invariant violation: process records are never deleted");
            if process.invalidate_address(address) {
                let application_name = process.application_name().to_string();
                self.publish_process(&namespec);
                self.refresh_application(&application_name);
            }
        }
    }

    fn refresh_application(&mut self, name: &str) {
        let Some(application) = self.applications.get_mut(name) else {
            return;
        };
        let namespecs: Vec<String> = application.processes().iter().cloned().collect();
        let members = namespecs
            .iter()
            .filter_map(|namespec| self.processes.get(namespec));
        if application.refresh(members) {
            self.bus.application_status(application.status_snapshot());
        }
    }

    fn publish_address(&self, name: &str) {
        if let Some(status) = self.addresses.get(name) {
            self.bus.address_status(status.snapshot());
        }
    }

    fn publish_process(&self, namespec: &str) {
        if let Some(process) = self.processes.get(namespec) {
            self.bus.process_status(process.snapshot());
        }
    }
}
