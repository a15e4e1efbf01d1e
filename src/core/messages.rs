// src/core/messages.rs

//! Typed messages exchanged over the internal bus, decoded once at the
//! transport boundary, plus the deferred-request channel fed by the agent.

use crate::core::MusterError;
use crate::core::address::AddressState;
use crate::core::process::ProcessState;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// A single process observation as reported by a host's process manager.
///
/// The same record shape is used for incremental process events and for the
/// bulk `info` bootstrap sent after a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub group: String,
    pub name: String,
    pub state: ProcessState,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub spawnerr: Option<String>,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub stop: u64,
    #[serde(default)]
    pub now: u64,
    /// Whether an EXITED state carried an expected exit code.
    #[serde(default = "default_expected")]
    pub expected: bool,
}

fn default_expected() -> bool {
    true
}

impl ProcessInfo {
    /// The `application:process` identifier of this record.
    pub fn namespec(&self) -> String {
        format!("{}:{}", self.group, self.name)
    }
}

/// Payload of a supervisor-status publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatusEvent {
    pub address: String,
    pub state: String,
    pub master_address: String,
}

/// Payload of an address-status publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStatusEvent {
    pub address: String,
    pub state: AddressState,
    pub last_remote_time: u64,
    pub last_local_time: u64,
}

/// Payload of an application-status publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatusEvent {
    pub application_name: String,
    pub state: String,
    pub major_failure: bool,
}

/// Payload of a process-status publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatusEvent {
    pub application_name: String,
    pub process_name: String,
    pub state: ProcessState,
    pub addresses: Vec<String>,
    pub conflict: bool,
}

/// The messages carried by the internal publish/subscribe bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// A periodic heartbeat carrying the sender's wall-clock time.
    Tick { address: String, when: u64 },
    /// An incremental process state change observed on a host.
    Process {
        address: String,
        event: ProcessInfo,
    },
    /// The verdict of a `CHECK_ADDRESS` round trip.
    Auth { address: String, authorized: bool },
    /// The authoritative process snapshot sent just before a positive `Auth`.
    Info {
        address: String,
        processes: Vec<ProcessInfo>,
    },
    SupervisorStatus(SupervisorStatusEvent),
    AddressStatus(AddressStatusEvent),
    ApplicationStatus(ApplicationStatusEvent),
    ProcessStatus(ProcessStatusEvent),
}

/// Formats the authorization body in its historical wire shape.
pub fn format_auth_body(address: &str, authorized: bool) -> String {
    format!("address_name:{address} authorized:{authorized}")
}

/// Parses an authorization body of the form `address_name:<a> authorized:<b>`.
pub fn parse_auth_body(body: &str) -> Result<(String, bool), MusterError> {
    let mut address = None;
    let mut authorized = None;
    for part in body.split_whitespace() {
        match part.split_once(':') {
            Some(("address_name", value)) => address = Some(value.to_string()),
            Some(("authorized", value)) => {
                authorized = Some(value.parse::<bool>().map_err(|_| {
                    MusterError::Protocol(format!("invalid authorized flag '{value}'"))
                })?);
            }
            _ => return Err(MusterError::Protocol(format!("unexpected field '{part}'"))),
        }
    }
    match (address, authorized) {
        (Some(address), Some(authorized)) => Ok((address, authorized)),
        _ => Err(MusterError::Protocol(format!(
            "incomplete authorization body '{body}'"
        ))),
    }
}

/// Formats the info bootstrap body as the JSON pair `[address, [process_info, ...]]`.
pub fn format_info_body(
    address: &str,
    processes: &[ProcessInfo],
) -> Result<String, MusterError> {
    Ok(serde_json::to_string(&(address, processes))?)
}

/// Parses an info bootstrap body back into its address and process list.
pub fn parse_info_body(body: &str) -> Result<(String, Vec<ProcessInfo>), MusterError> {
    Ok(serde_json::from_str(body)?)
}

/// A remote communication event re-posted to the agent task, so that all
/// state mutation happens there.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Tick {
        address: String,
        when: u64,
    },
    Process {
        address: String,
        event: ProcessInfo,
    },
    Authorization {
        address: String,
        authorized: bool,
    },
    Info {
        address: String,
        processes: Vec<ProcessInfo>,
    },
}

/// The out-of-band actions the agent defers to the main loop worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferredRequest {
    CheckAddress(String),
    IsolateAddresses(Vec<String>),
    StartProcess {
        address: String,
        namespec: String,
        extra_args: String,
    },
    StopProcess {
        address: String,
        namespec: String,
    },
    Restart(String),
    Shutdown(String),
}

/// The agent-side handle on the puller channel. Sends never block; a closed
/// channel (main loop stopped) is logged and dropped.
#[derive(Debug, Clone)]
pub struct RequestPusher {
    sender: mpsc::UnboundedSender<DeferredRequest>,
}

impl RequestPusher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeferredRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn push(&self, request: DeferredRequest) {
        if self.sender.send(request).is_err() {
            warn!("Deferred request dropped: main loop is not running.");
        }
    }

    pub fn check_address(&self, address: &str) {
        self.push(DeferredRequest::CheckAddress(address.to_string()));
    }

    pub fn isolate_addresses(&self, addresses: Vec<String>) {
        if !addresses.is_empty() {
            self.push(DeferredRequest::IsolateAddresses(addresses));
        }
    }

    pub fn start_process(&self, address: &str, namespec: &str, extra_args: &str) {
        self.push(DeferredRequest::StartProcess {
            address: address.to_string(),
            namespec: namespec.to_string(),
            extra_args: extra_args.to_string(),
        });
    }

    pub fn stop_process(&self, address: &str, namespec: &str) {
        self.push(DeferredRequest::StopProcess {
            address: address.to_string(),
            namespec: namespec.to_string(),
        });
    }

    pub fn restart(&self, address: &str) {
        self.push(DeferredRequest::Restart(address.to_string()));
    }

    pub fn shutdown(&self, address: &str) {
        self.push(DeferredRequest::Shutdown(address.to_string()));
    }
}
