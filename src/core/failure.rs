// src/core/failure.rs

//! Queues per-process failure reactions until the next timer tick. Every
//! agent records jobs; only the master drains them.

use crate::core::context::Context;
use crate::core::deployer::Deployer;
use crate::core::rules::RunningFailureStrategy;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Deduplicated failure work, keyed by the strategy of the crashed process.
#[derive(Debug, Default)]
pub struct FailureHandler {
    restart_processes: BTreeSet<String>,
    stop_applications: BTreeSet<String>,
    restart_applications: BTreeSet<String>,
}

impl FailureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the reaction for one crashed process. CONTINUE is a no-op by
    /// definition.
    pub fn add_job(
        &mut self,
        namespec: &str,
        application_name: &str,
        strategy: RunningFailureStrategy,
    ) {
        debug!("Failure job for '{namespec}': {strategy}.");
        match strategy {
            RunningFailureStrategy::Continue => {}
            RunningFailureStrategy::RestartProcess => {
                self.restart_processes.insert(namespec.to_string());
            }
            RunningFailureStrategy::StopApplication => {
                self.stop_applications.insert(application_name.to_string());
            }
            RunningFailureStrategy::RestartApplication => {
                self.restart_applications
                    .insert(application_name.to_string());
            }
        }
    }

    pub fn has_jobs(&self) -> bool {
        !self.restart_processes.is_empty()
            || !self.stop_applications.is_empty()
            || !self.restart_applications.is_empty()
    }

    /// Hands all queued work to the deployer. Called from the timer tick, and
    /// only on the master; a master change hands pending work off implicitly
    /// through the marked processes.
    pub fn drain(&mut self, ctx: &mut Context, deployer: &mut dyn Deployer) {
        if !self.has_jobs() && ctx.marked_processes().is_empty() {
            return;
        }
        info!(
            "Draining failure jobs: {} restart(s), {} application stop(s), {} application restart(s).",
            self.restart_processes.len(),
            self.stop_applications.len(),
            self.restart_applications.len()
        );

        let marked = ctx
            .marked_processes()
            .iter()
            .map(|process| process.snapshot())
            .collect::<Vec<_>>();
        if !marked.is_empty() {
            deployer.deploy_marked_processes(marked);
            ctx.clear_marks();
        }
        if !self.stop_applications.is_empty() {
            deployer.stop_applications(self.stop_applications.iter().cloned().collect());
        }
        if !self.restart_applications.is_empty() {
            deployer.restart_applications(self.restart_applications.iter().cloned().collect());
        }
        self.restart_processes.clear();
        self.stop_applications.clear();
        self.restart_applications.clear();
    }
}
