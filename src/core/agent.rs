// src/core/agent.rs

//! The agent task: single owner of the Context, the FSM and the failure
//! handler. External callers post events through a queue; a wall-clock timer
//! paces the supervision cycle.

use crate::config::Config;
use crate::core::MusterError;
use crate::core::conciliation::ConciliationStrategy;
use crate::core::context::Context;
use crate::core::deployer::Deployer;
use crate::core::events::EventBus;
use crate::core::failure::FailureHandler;
use crate::core::fsm::{Fsm, TickDeps};
use crate::core::messages::{AgentEvent, DeferredRequest, ProcessInfo, RequestPusher, WireMessage};
use crate::core::rules::{RulesBook, RunningFailureStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info};

/// Current wall clock in epoch seconds.
pub fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The channel ends the rest of the system needs to talk to a built agent.
pub struct AgentHandles {
    /// Status publications, for the transport bridge and any observer.
    pub bus: Arc<EventBus>,
    /// Ingress: remote communication events are posted here.
    pub events: mpsc::UnboundedSender<AgentEvent>,
    /// Egress: the puller end consumed by the main loop.
    pub requests: mpsc::UnboundedReceiver<DeferredRequest>,
}

pub struct Agent {
    local_address: String,
    tick_period: u64,
    synchro_timeout: u64,
    conciliation_strategy: ConciliationStrategy,
    ctx: Context,
    fsm: Fsm,
    failure: FailureHandler,
    deployer: Box<dyn Deployer>,
    bus: Arc<EventBus>,
    requests: RequestPusher,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    /// Info bootstraps received and not yet claimed by their authorization.
    pending_info: HashMap<String, Vec<ProcessInfo>>,
}

impl Agent {
    /// Builds the whole supervision kernel from a validated configuration.
    /// There is no process-wide state: everything hangs off the returned
    /// agent and its handles.
    pub fn init(
        config: &Config,
        rules: RulesBook,
        deployer: Box<dyn Deployer>,
    ) -> Result<(Self, AgentHandles), MusterError> {
        config.validate()?;
        let bus = Arc::new(EventBus::new());
        let (requests, request_receiver) = RequestPusher::new();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        let mut ctx = Context::new(
            &config.address_list,
            &config.local_address,
            config.silence_timeout.as_secs(),
            config.auto_fence,
            rules,
            bus.clone(),
            requests.clone(),
        );
        let now = epoch_now();
        let fsm = Fsm::new(&mut ctx, bus.clone(), now);

        let agent = Self {
            local_address: config.local_address.clone(),
            tick_period: config.tick_period.as_secs().max(1),
            synchro_timeout: config.synchro_timeout.as_secs(),
            conciliation_strategy: config.conciliation_strategy,
            ctx,
            fsm,
            failure: FailureHandler::new(),
            deployer,
            bus: bus.clone(),
            requests,
            events: event_receiver,
            pending_info: HashMap::new(),
        };
        let handles = AgentHandles {
            bus,
            events: event_sender,
            requests: request_receiver,
        };
        Ok((agent, handles))
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn fsm(&self) -> &Fsm {
        &self.fsm
    }

    /// Ingests one queued event. Events are processed in arrival order,
    /// before the FSM evaluates on the next timer tick.
    pub fn handle_event(&mut self, event: AgentEvent, now: u64) {
        match event {
            AgentEvent::Tick { address, when } => {
                self.ctx.on_tick_event(&address, when, now);
            }
            AgentEvent::Process { address, event } => {
                if let Some(outcome) = self.ctx.on_process_event(&address, event) {
                    if outcome.crashed {
                        info!(
                            "Process '{}' crashed on {address}; queueing {}.",
                            outcome.namespec, outcome.running_failure_strategy
                        );
                        if outcome.running_failure_strategy
                            == RunningFailureStrategy::RestartProcess
                        {
                            self.ctx.mark_process(&outcome.namespec);
                        }
                        self.failure.add_job(
                            &outcome.namespec,
                            &outcome.application_name,
                            outcome.running_failure_strategy,
                        );
                    }
                }
            }
            AgentEvent::Authorization {
                address,
                authorized,
            } => {
                let processes = self.pending_info.remove(&address).unwrap_or_default();
                self.ctx
                    .on_authorization(&address, authorized, processes, now);
            }
            AgentEvent::Info { address, processes } => {
                debug!("Buffered info bootstrap for {address}.");
                self.pending_info.insert(address, processes);
            }
        }
    }

    /// One supervision cycle: publish the local heartbeat, age out silent
    /// peers, evaluate the FSM, drain failure work on the master, and seal
    /// pending isolations.
    pub fn on_timer_event(&mut self, now: u64) {
        let local = self.local_address.clone();
        self.bus.publish(WireMessage::Tick {
            address: local.clone(),
            when: now,
        });
        self.ctx.on_tick_event(&local, now, now);

        self.ctx.on_timer_event(now);

        let mut deps = TickDeps {
            deployer: self.deployer.as_mut(),
            requests: &self.requests,
            failure: &mut self.failure,
            synchro_timeout: self.synchro_timeout,
            conciliation_strategy: self.conciliation_strategy,
        };
        self.fsm.tick(&mut self.ctx, &mut deps, now);

        if self.fsm.is_master(&self.ctx) {
            self.failure.drain(&mut self.ctx, self.deployer.as_mut());
        }

        let isolated = self.ctx.handle_isolation();
        self.requests.isolate_addresses(isolated);
    }

    /// Runs the agent until its event channel closes.
    pub async fn run(mut self) {
        info!(
            "Agent for '{}' running with a {}s tick period.",
            self.local_address, self.tick_period
        );
        let mut timer = time::interval(time::Duration::from_secs(self.tick_period));
        loop {
            // Resolve the poll before touching state, so the handlers below
            // can borrow the whole agent.
            let event = tokio::select! {
                _ = timer.tick() => None,
                event = self.events.recv() => Some(event),
            };
            match event {
                None => self.on_timer_event(epoch_now()),
                Some(Some(event)) => self.handle_event(event, epoch_now()),
                Some(None) => {
                    info!("Agent event channel closed; agent stopping.");
                    return;
                }
            }
        }
    }
}
