// src/core/rules.rs

//! Immutable per-application and per-process deployment rules, with the
//! loader that produces them from the rules file.
//!
//! Unknown or empty references fall back to documented defaults, so a process
//! observed at runtime never fails a rules lookup.

use crate::core::MusterError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use strum_macros::{Display, EnumString};

/// Reaction applied when a required process fails while its application starts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StartingFailureStrategy {
    Abort,
    Stop,
    #[default]
    Continue,
}

/// Reaction applied when a process crashes in steady-state operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunningFailureStrategy {
    #[default]
    Continue,
    RestartProcess,
    StopApplication,
    RestartApplication,
}

/// Which hosts a process may be deployed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressRule {
    /// `*`: any host in the membership.
    All,
    /// `#`: the Nth instance of a homogeneous group pins to the Nth running
    /// host in sorted order.
    HashAssigned,
    /// An explicit list, filtered against the configured membership.
    List(Vec<String>),
}

impl Default for AddressRule {
    fn default() -> Self {
        AddressRule::All
    }
}

impl AddressRule {
    fn from_entries(entries: &[String]) -> Self {
        if entries.is_empty() || entries.iter().any(|e| e == "*") {
            AddressRule::All
        } else if entries.iter().any(|e| e == "#") {
            AddressRule::HashAssigned
        } else {
            AddressRule::List(entries.to_vec())
        }
    }

    /// Resolves the rule to the concrete candidate hosts for one process
    /// instance. `running` must be sorted; `instance_index` is only relevant
    /// for hash assignment.
    pub fn resolve(
        &self,
        instance_index: usize,
        membership: &[String],
        running: &[String],
    ) -> Vec<String> {
        match self {
            AddressRule::All => membership.to_vec(),
            AddressRule::HashAssigned => {
                if running.is_empty() {
                    Vec::new()
                } else {
                    vec![running[instance_index % running.len()].clone()]
                }
            }
            AddressRule::List(entries) => entries
                .iter()
                .filter(|e| membership.contains(e))
                .cloned()
                .collect(),
        }
    }
}

/// The instance index of a process within a homogeneous group, taken from its
/// trailing digits (`worker_02` -> 2). Processes without a numeric suffix are
/// instance 0.
pub fn instance_index(process_name: &str) -> usize {
    let digits: String = process_name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}

/// Immutable rules attached to a process status.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRules {
    pub addresses: AddressRule,
    pub start_sequence: u32,
    pub stop_sequence: u32,
    pub required: bool,
    pub wait_exit: bool,
    /// Expected share of its host's capacity, clamped to 1..=100.
    pub expected_loading: u8,
    pub running_failure_strategy: RunningFailureStrategy,
}

impl Default for ProcessRules {
    fn default() -> Self {
        Self {
            addresses: AddressRule::All,
            start_sequence: 0,
            stop_sequence: 0,
            required: false,
            wait_exit: false,
            expected_loading: 1,
            running_failure_strategy: RunningFailureStrategy::Continue,
        }
    }
}

/// Immutable rules attached to an application status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplicationRules {
    pub start_sequence: u32,
    pub stop_sequence: u32,
    pub starting_failure_strategy: StartingFailureStrategy,
    pub running_failure_strategy: RunningFailureStrategy,
}

// --- serde shapes of the rules file ---

#[derive(Debug, Default, Deserialize)]
struct RulesFile {
    #[serde(default)]
    application: BTreeMap<String, ApplicationEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationEntry {
    #[serde(default)]
    start_sequence: u32,
    #[serde(default)]
    stop_sequence: u32,
    #[serde(default)]
    starting_failure_strategy: StartingFailureStrategy,
    #[serde(default)]
    running_failure_strategy: RunningFailureStrategy,
    #[serde(default)]
    program: BTreeMap<String, ProgramEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ProgramEntry {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    start_sequence: u32,
    #[serde(default)]
    stop_sequence: u32,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    wait_exit: bool,
    #[serde(default = "default_loading")]
    expected_loading: i64,
    #[serde(default)]
    running_failure_strategy: RunningFailureStrategy,
}

fn default_loading() -> i64 {
    1
}

/// Out-of-range loadings clamp to the minimum rather than erroring out.
fn clamp_loading(value: i64) -> u8 {
    if (1..=100).contains(&value) {
        value as u8
    } else {
        1
    }
}

/// The loaded rule set. Lookups never fail: absent applications or programs
/// resolve to the documented defaults.
#[derive(Debug, Default)]
pub struct RulesBook {
    applications: BTreeMap<String, ApplicationRules>,
    processes: BTreeMap<String, ProcessRules>,
}

impl RulesBook {
    pub fn load(path: &Path) -> Result<Self, MusterError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MusterError::Rules(format!("cannot read rules file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, MusterError> {
        let file: RulesFile =
            toml::from_str(content).map_err(|e| MusterError::Rules(e.to_string()))?;

        let mut applications = BTreeMap::new();
        let mut processes = BTreeMap::new();
        for (app_name, app) in file.application {
            applications.insert(
                app_name.clone(),
                ApplicationRules {
                    start_sequence: app.start_sequence,
                    stop_sequence: app.stop_sequence,
                    starting_failure_strategy: app.starting_failure_strategy,
                    running_failure_strategy: app.running_failure_strategy,
                },
            );
            for (program_name, program) in app.program {
                processes.insert(
                    format!("{app_name}:{program_name}"),
                    ProcessRules {
                        addresses: AddressRule::from_entries(&program.addresses),
                        start_sequence: program.start_sequence,
                        stop_sequence: program.stop_sequence,
                        required: program.required,
                        wait_exit: program.wait_exit,
                        expected_loading: clamp_loading(program.expected_loading),
                        running_failure_strategy: program.running_failure_strategy,
                    },
                );
            }
        }
        Ok(Self {
            applications,
            processes,
        })
    }

    /// Rules for an application, falling back to defaults when absent.
    pub fn application_rules(&self, application_name: &str) -> ApplicationRules {
        self.applications
            .get(application_name)
            .copied()
            .unwrap_or_default()
    }

    /// Rules for a process namespec, falling back to defaults when absent.
    pub fn process_rules(&self, namespec: &str) -> ProcessRules {
        self.processes.get(namespec).cloned().unwrap_or_default()
    }
}
