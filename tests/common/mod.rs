// tests/common/mod.rs

//! In-memory fakes and a driving harness shared by the test suite.

#![allow(dead_code)]

use async_trait::async_trait;
use muster::MusterError;
use muster::core::address::AddressState;
use muster::core::application::ApplicationSnapshot;
use muster::core::conciliation::ConciliationStrategy;
use muster::core::context::Context;
use muster::core::deployer::Deployer;
use muster::core::events::EventBus;
use muster::core::failure::FailureHandler;
use muster::core::fsm::{Fsm, TickDeps};
use muster::core::mainloop::InternalSubscriber;
use muster::core::messages::{
    DeferredRequest, ProcessInfo, ProcessStatusEvent, RequestPusher, WireMessage,
};
use muster::core::process::ProcessState;
use muster::core::rules::RulesBook;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// A process record with sensible filler for the fields a test does not care
/// about.
pub fn info(group: &str, name: &str, state: ProcessState, pid: u32, start: u64) -> ProcessInfo {
    ProcessInfo {
        group: group.to_string(),
        name: name.to_string(),
        state,
        pid,
        spawnerr: None,
        start,
        stop: 0,
        now: start,
        expected: true,
    }
}

// --- deployer fake ---

#[derive(Debug)]
pub struct FakeDeployerState {
    pub done: bool,
    pub deployed: Vec<Vec<ApplicationSnapshot>>,
    pub marked: Vec<Vec<ProcessStatusEvent>>,
    pub stopped_applications: Vec<Vec<String>>,
    pub restarted_applications: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct FakeDeployer {
    pub state: Arc<Mutex<FakeDeployerState>>,
}

impl FakeDeployer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeDeployerState {
                done: true,
                deployed: Vec::new(),
                marked: Vec::new(),
                stopped_applications: Vec::new(),
                restarted_applications: Vec::new(),
            })),
        }
    }

    pub fn set_done(&self, done: bool) {
        self.state.lock().done = done;
    }
}

impl Deployer for FakeDeployer {
    fn deploy_applications(&mut self, applications: Vec<ApplicationSnapshot>) {
        self.state.lock().deployed.push(applications);
    }

    fn check_deployment(&mut self) -> bool {
        self.state.lock().done
    }

    fn deploy_marked_processes(&mut self, processes: Vec<ProcessStatusEvent>) {
        self.state.lock().marked.push(processes);
    }

    fn stop_applications(&mut self, applications: Vec<String>) {
        self.state.lock().stopped_applications.push(applications);
    }

    fn restart_applications(&mut self, applications: Vec<String>) {
        self.state.lock().restarted_applications.push(applications);
    }
}

// --- process-manager RPC fake ---

#[derive(Debug, Default)]
pub struct FakeRpcState {
    /// Self-reported state per address; absent means RUNNING.
    pub states: HashMap<String, AddressState>,
    /// Process info list served per address.
    pub infos: HashMap<String, Vec<ProcessInfo>>,
    /// Addresses whose every call errors out.
    pub failing: HashSet<String>,
    /// Log of calls, formatted `method address [args]`.
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeRpc {
    pub state: Arc<Mutex<FakeRpcState>>,
}

impl FakeRpc {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self, method: &str, address: &str, args: &str) -> Result<(), MusterError> {
        let mut state = self.state.lock();
        let call = if args.is_empty() {
            format!("{method} {address}")
        } else {
            format!("{method} {address} {args}")
        };
        state.calls.push(call);
        if state.failing.contains(address) {
            return Err(MusterError::Rpc(format!("{address} unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl muster::core::rpc::ProcessManagerClient for FakeRpc {
    async fn instance_state(&self, address: &str) -> Result<AddressState, MusterError> {
        self.guard("instance_state", address, "")?;
        Ok(self
            .state
            .lock()
            .states
            .get(address)
            .copied()
            .unwrap_or(AddressState::Running))
    }

    async fn all_process_info(&self, address: &str) -> Result<Vec<ProcessInfo>, MusterError> {
        self.guard("all_process_info", address, "")?;
        Ok(self
            .state
            .lock()
            .infos
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn start_process(
        &self,
        address: &str,
        namespec: &str,
        extra_args: &str,
    ) -> Result<(), MusterError> {
        self.guard("start_process", address, &format!("{namespec} {extra_args}"))
    }

    async fn stop_process(&self, address: &str, namespec: &str) -> Result<(), MusterError> {
        self.guard("stop_process", address, namespec)
    }

    async fn restart(&self, address: &str) -> Result<(), MusterError> {
        self.guard("restart", address, "")
    }

    async fn shutdown(&self, address: &str) -> Result<(), MusterError> {
        self.guard("shutdown", address, "")
    }
}

// --- internal subscriber fake ---

pub struct ChannelSubscriber {
    receiver: mpsc::UnboundedReceiver<WireMessage>,
    pub disconnected: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ChannelSubscriber {
    pub fn new() -> (mpsc::UnboundedSender<WireMessage>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                receiver,
                disconnected: Arc::new(Mutex::new(Vec::new())),
            },
        )
    }
}

#[async_trait]
impl InternalSubscriber for ChannelSubscriber {
    async fn recv(&mut self) -> Option<WireMessage> {
        self.receiver.recv().await
    }

    fn disconnect(&mut self, addresses: &[String]) {
        self.disconnected.lock().push(addresses.to_vec());
    }
}

// --- driving harness ---

/// Owns a Context, an FSM and their collaborators, and drives them with an
/// explicit clock the way the agent task would.
pub struct Harness {
    pub local: String,
    pub ctx: Context,
    pub fsm: Fsm,
    pub failure: FailureHandler,
    pub deployer: FakeDeployer,
    pub requests: RequestPusher,
    pub request_rx: mpsc::UnboundedReceiver<DeferredRequest>,
    pub bus: Arc<EventBus>,
    pub bus_rx: broadcast::Receiver<WireMessage>,
    pub synchro_timeout: u64,
    pub strategy: ConciliationStrategy,
}

impl Harness {
    pub fn new(addresses: &[&str], local: &str, auto_fence: bool, synchro_timeout: u64) -> Self {
        Self::with_rules(addresses, local, auto_fence, synchro_timeout, RulesBook::default())
    }

    pub fn with_rules(
        addresses: &[&str],
        local: &str,
        auto_fence: bool,
        synchro_timeout: u64,
        rules: RulesBook,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let bus_rx = bus.subscribe();
        let (requests, request_rx) = RequestPusher::new();
        let address_list: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        let mut ctx = Context::new(
            &address_list,
            local,
            10,
            auto_fence,
            rules,
            bus.clone(),
            requests.clone(),
        );
        let fsm = Fsm::new(&mut ctx, bus.clone(), 0);
        Self {
            local: local.to_string(),
            ctx,
            fsm,
            failure: FailureHandler::new(),
            deployer: FakeDeployer::new(),
            requests,
            request_rx,
            bus,
            bus_rx,
            synchro_timeout,
            strategy: ConciliationStrategy::User,
        }
    }

    /// Runs the FSM evaluation loop once, as the timer would.
    pub fn tick_fsm(&mut self, now: u64) {
        let mut deps = TickDeps {
            deployer: &mut self.deployer,
            requests: &self.requests,
            failure: &mut self.failure,
            synchro_timeout: self.synchro_timeout,
            conciliation_strategy: self.strategy,
        };
        self.fsm.tick(&mut self.ctx, &mut deps, now);
    }

    /// One full supervision cycle, mirroring the agent's timer handler.
    pub fn timer(&mut self, now: u64) {
        self.local_tick(now);
        self.ctx.on_timer_event(now);
        self.tick_fsm(now);
        if self.fsm.is_master(&self.ctx) {
            self.failure.drain(&mut self.ctx, &mut self.deployer);
        }
        let isolated = self.ctx.handle_isolation();
        self.requests.isolate_addresses(isolated);
    }

    /// The local heartbeat, which vouches for the local host.
    pub fn local_tick(&mut self, now: u64) {
        let local = self.local.clone();
        self.ctx.on_tick_event(&local, now, now);
    }

    pub fn drain_requests(&mut self) -> Vec<DeferredRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.request_rx.try_recv() {
            requests.push(request);
        }
        requests
    }

    pub fn drain_bus(&mut self) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.bus_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// The supervisor-status states published so far, in order.
    pub fn supervisor_states(&mut self) -> Vec<String> {
        self.drain_bus()
            .into_iter()
            .filter_map(|message| match message {
                WireMessage::SupervisorStatus(event) => Some(event.state),
                _ => None,
            })
            .collect()
    }
}
