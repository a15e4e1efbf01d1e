// src/core/application.rs

//! Aggregated view of an application: a named set of processes with shared
//! deployment rules and a state derived from its members.

use crate::core::messages::ApplicationStatusEvent;
use crate::core::process::{ProcessState, ProcessStatus};
use crate::core::rules::ApplicationRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum_macros::{Display, EnumString};

/// The state of an application, derived from its member processes.
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
pub enum ApplicationState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// A deployable unit handed to the deployer: the application and its member
/// processes, ordered by the start sequence of its rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSnapshot {
    pub name: String,
    pub start_sequence: u32,
    pub state: ApplicationState,
    pub processes: Vec<String>,
}

/// The cross-host status of one application. Owned by the Context.
#[derive(Debug, Clone)]
pub struct ApplicationStatus {
    name: String,
    rules: ApplicationRules,
    /// Member process namespecs.
    processes: BTreeSet<String>,
    state: ApplicationState,
    /// True when a required member has crashed while the application runs.
    major_failure: bool,
}

impl ApplicationStatus {
    pub fn new(name: &str, rules: ApplicationRules) -> Self {
        Self {
            name: name.to_string(),
            rules,
            processes: BTreeSet::new(),
            state: ApplicationState::Stopped,
            major_failure: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &ApplicationRules {
        &self.rules
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    pub fn major_failure(&self) -> bool {
        self.major_failure
    }

    pub fn processes(&self) -> &BTreeSet<String> {
        &self.processes
    }

    pub fn add_process(&mut self, namespec: &str) {
        self.processes.insert(namespec.to_string());
    }

    /// Recomputes the derived state from the member statuses. Returns true
    /// when the state or the major-failure flag changed.
    pub fn refresh<'a>(&mut self, members: impl Iterator<Item = &'a ProcessStatus>) -> bool {
        let mut starting = false;
        let mut stopping = false;
        let mut running = false;
        let mut major_failure = false;

        for member in members {
            match member.state() {
                ProcessState::Starting | ProcessState::Backoff => starting = true,
                ProcessState::Stopping => stopping = true,
                ProcessState::Running => running = true,
                ProcessState::Fatal | ProcessState::Exited => {
                    if member.rules().required {
                        major_failure = true;
                    }
                }
                ProcessState::Stopped | ProcessState::Unknown => {}
            }
        }

        let new_state = if starting {
            ApplicationState::Starting
        } else if stopping {
            ApplicationState::Stopping
        } else if running {
            ApplicationState::Running
        } else {
            ApplicationState::Stopped
        };
        // A crash only counts as a major failure while the application is up.
        let new_major_failure = major_failure && new_state == ApplicationState::Running;

        let changed = new_state != self.state || new_major_failure != self.major_failure;
        self.state = new_state;
        self.major_failure = new_major_failure;
        changed
    }

    /// A read-only view suitable for publication.
    pub fn status_snapshot(&self) -> ApplicationStatusEvent {
        ApplicationStatusEvent {
            application_name: self.name.clone(),
            state: self.state.to_string(),
            major_failure: self.major_failure,
        }
    }

    /// The deployable view handed to the deployer.
    pub fn deployment_snapshot(&self) -> ApplicationSnapshot {
        ApplicationSnapshot {
            name: self.name.clone(),
            start_sequence: self.rules.start_sequence,
            state: self.state,
            processes: self.processes.iter().cloned().collect(),
        }
    }
}
