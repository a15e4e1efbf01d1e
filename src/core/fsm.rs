// src/core/fsm.rs

//! The four-state supervisor lifecycle. Evaluated on every timer tick; a
//! single tick collapses multi-step transitions, publishing every
//! intermediate state in order.

use crate::core::conciliation::{ConciliationStrategy, conciliate};
use crate::core::context::Context;
use crate::core::deployer::Deployer;
use crate::core::events::EventBus;
use crate::core::failure::FailureHandler;
use crate::core::messages::{RequestPusher, SupervisorStatusEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

/// The agent's view of the cluster lifecycle.
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
pub enum SupervisorState {
    /// Waiting for every peer to be classified, or for the synchro timeout.
    Initialization,
    /// The master is driving the initial application deployment.
    Deployment,
    /// Steady state.
    Operation,
    /// Conflicts exist; the master is resolving them.
    Conciliation,
}

/// Everything the FSM needs besides the Context to run one tick.
pub struct TickDeps<'a> {
    pub deployer: &'a mut dyn Deployer,
    pub requests: &'a RequestPusher,
    pub failure: &'a mut FailureHandler,
    pub synchro_timeout: u64,
    pub conciliation_strategy: ConciliationStrategy,
}

pub struct Fsm {
    state: SupervisorState,
    /// Empty until the first synchronization completes.
    master_address: String,
    /// Epoch seconds at the last INITIALIZATION entry.
    start_date: u64,
    bus: Arc<EventBus>,
}

impl Fsm {
    /// Builds the FSM in INITIALIZATION and publishes the initial status.
    pub fn new(ctx: &mut Context, bus: Arc<EventBus>, now: u64) -> Self {
        let mut fsm = Self {
            state: SupervisorState::Initialization,
            master_address: String::new(),
            start_date: now,
            bus,
        };
        fsm.enter(ctx, None, now);
        fsm.publish_status(ctx);
        fsm
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn master_address(&self) -> &str {
        &self.master_address
    }

    pub fn start_date(&self) -> u64 {
        self.start_date
    }

    /// Whether the local agent currently is the master.
    pub fn is_master(&self, ctx: &Context) -> bool {
        !self.master_address.is_empty() && self.master_address == ctx.local_address()
    }

    /// The JSON surface exposed to the RPC and web layers.
    pub fn state_json(&self) -> serde_json::Value {
        json!({ "state": self.state.to_string() })
    }

    /// The strict transition table. Anything else is ignored.
    pub fn transition_allowed(from: SupervisorState, to: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (from, to),
            (Initialization, Deployment)
                | (Deployment, Operation)
                | (Deployment, Conciliation)
                | (Operation, Conciliation)
                | (Operation, Initialization)
                | (Conciliation, Operation)
                | (Conciliation, Initialization)
        )
    }

    /// Runs the evaluation loop for one tick: while the evaluation yields a
    /// different legal state, exit the current state, install the new one,
    /// publish it, run its entry actions, and re-evaluate.
    pub fn tick(&mut self, ctx: &mut Context, deps: &mut TickDeps<'_>, now: u64) {
        loop {
            let next = self.evaluate(ctx, deps, now);
            if next == self.state {
                break;
            }
            if !Self::transition_allowed(self.state, next) {
                debug!("Ignored illegal transition {} -> {}.", self.state, next);
                break;
            }
            info!("Supervisor state: {} -> {}.", self.state, next);
            self.exit(ctx);
            self.state = next;
            self.publish_status(ctx);
            self.enter(ctx, Some(&mut *deps), now);
        }
    }

    fn evaluate(&self, ctx: &Context, deps: &mut TickDeps<'_>, now: u64) -> SupervisorState {
        match self.state {
            SupervisorState::Initialization => {
                if ctx.local_running() && ctx.unknown_addresses().is_empty() {
                    SupervisorState::Deployment
                } else if now.saturating_sub(self.start_date) >= deps.synchro_timeout {
                    // Proceed with whoever answered.
                    SupervisorState::Deployment
                } else {
                    SupervisorState::Initialization
                }
            }
            SupervisorState::Deployment => {
                if deps.deployer.check_deployment() {
                    if ctx.conflicting() {
                        SupervisorState::Conciliation
                    } else {
                        SupervisorState::Operation
                    }
                } else {
                    SupervisorState::Deployment
                }
            }
            SupervisorState::Operation => {
                if self.quorum_lost(ctx) {
                    SupervisorState::Initialization
                } else if ctx.conflicting() {
                    SupervisorState::Conciliation
                } else {
                    SupervisorState::Operation
                }
            }
            SupervisorState::Conciliation => {
                if self.quorum_lost(ctx) {
                    SupervisorState::Initialization
                } else if !ctx.conflicting() {
                    SupervisorState::Operation
                } else {
                    SupervisorState::Conciliation
                }
            }
        }
    }

    /// The local or the master host dropping out of RUNNING forces a new
    /// synchronization round.
    fn quorum_lost(&self, ctx: &Context) -> bool {
        !ctx.local_running() || !ctx.is_address_running(&self.master_address)
    }

    fn enter(&mut self, ctx: &mut Context, deps: Option<&mut TickDeps<'_>>, now: u64) {
        match self.state {
            SupervisorState::Initialization => {
                self.master_address.clear();
                self.start_date = now;
                ctx.reset_addresses();
            }
            SupervisorState::Deployment => {
                let applications = ctx.deployment_snapshots();
                if let Some(deps) = deps {
                    if self.is_master(ctx) {
                        deps.deployer.deploy_applications(applications);
                    }
                }
            }
            SupervisorState::Operation => {}
            SupervisorState::Conciliation => {
                if let Some(deps) = deps {
                    if self.is_master(ctx) {
                        conciliate(
                            deps.conciliation_strategy,
                            ctx,
                            deps.requests,
                            deps.failure,
                        );
                    }
                }
            }
        }
    }

    fn exit(&mut self, ctx: &mut Context) {
        if self.state == SupervisorState::Initialization {
            ctx.end_synchro();
            self.master_address = ctx.elect_master().unwrap_or_default();
            info!("Synchronization complete; master is '{}'.", self.master_address);
        }
    }

    fn publish_status(&self, ctx: &Context) {
        self.bus.supervisor_status(SupervisorStatusEvent {
            address: ctx.local_address().to_string(),
            state: self.state.to_string(),
            master_address: self.master_address.clone(),
        });
    }
}
