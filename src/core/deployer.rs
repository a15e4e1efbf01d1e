// src/core/deployer.rs

//! The contract the FSM uses to trigger deployment and stop work. The actual
//! sequencing engine is an external collaborator; the core only drives it and
//! polls its progress.

use crate::core::application::ApplicationSnapshot;
use crate::core::messages::ProcessStatusEvent;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

/// Placement policy consumed by the sequencing engine when it picks a host
/// for each process.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Follow the order of the rules file.
    #[default]
    Config,
    /// Pick the host with the smallest expected loading.
    LessLoaded,
    /// Pick the host with the greatest expected loading.
    MostLoaded,
}

/// Deployment driver seam. Implementations are expected to be cheap to call:
/// the FSM invokes them from the agent task.
pub trait Deployer: Send {
    /// Starts the full application set, in start-sequence order. Called once
    /// on DEPLOYMENT entry, and only on the master.
    fn deploy_applications(&mut self, applications: Vec<ApplicationSnapshot>);

    /// True when no deployment work is in progress. The FSM stays in
    /// DEPLOYMENT until this reports done.
    fn check_deployment(&mut self) -> bool;

    /// Incremental work for processes marked by the failure handler.
    fn deploy_marked_processes(&mut self, processes: Vec<ProcessStatusEvent>);

    /// Stops every process of the named applications.
    fn stop_applications(&mut self, applications: Vec<String>);

    /// Stops then redeploys the named applications.
    fn restart_applications(&mut self, applications: Vec<String>);
}

/// A deployer that acknowledges everything and does nothing. Used until a
/// sequencing engine is wired in, and by agents that never become master.
#[derive(Debug, Default)]
pub struct NoopDeployer;

impl Deployer for NoopDeployer {
    fn deploy_applications(&mut self, applications: Vec<ApplicationSnapshot>) {
        info!(
            "Deployment requested for {} application(s); nothing to drive.",
            applications.len()
        );
    }

    fn check_deployment(&mut self) -> bool {
        true
    }

    fn deploy_marked_processes(&mut self, processes: Vec<ProcessStatusEvent>) {
        debug!("Marked-process deployment requested for {} process(es).", processes.len());
    }

    fn stop_applications(&mut self, applications: Vec<String>) {
        debug!("Stop requested for applications {:?}.", applications);
    }

    fn restart_applications(&mut self, applications: Vec<String>) {
        debug!("Restart requested for applications {:?}.", applications);
    }
}
