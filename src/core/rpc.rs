// src/core/rpc.rs

//! Defines a simple, internal, asynchronous client used by the agent to
//! communicate with the process managers of remote hosts. The proxy is
//! rebuilt for every call and never shared.

use crate::core::MusterError;
use crate::core::address::AddressState;
use crate::core::messages::ProcessInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// The remote process-manager surface the main loop depends on. The test
/// suite substitutes an in-memory fake.
#[async_trait]
pub trait ProcessManagerClient: Send + Sync {
    /// The remote agent's self-reported view of its own cluster membership.
    async fn instance_state(&self, address: &str) -> Result<AddressState, MusterError>;

    /// The full local process info list of the remote host.
    async fn all_process_info(&self, address: &str) -> Result<Vec<ProcessInfo>, MusterError>;

    async fn start_process(
        &self,
        address: &str,
        namespec: &str,
        extra_args: &str,
    ) -> Result<(), MusterError>;

    async fn stop_process(&self, address: &str, namespec: &str) -> Result<(), MusterError>;

    /// Restarts the remote process manager.
    async fn restart(&self, address: &str) -> Result<(), MusterError>;

    /// Shuts the remote process manager down.
    async fn shutdown(&self, address: &str) -> Result<(), MusterError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// A JSON-line TCP client for the process-manager RPC port.
#[derive(Debug, Clone)]
pub struct TcpProcessManagerClient {
    rpc_port: u16,
}

impl TcpProcessManagerClient {
    pub fn new(rpc_port: u16) -> Self {
        Self { rpc_port }
    }

    /// Sends one request and waits for its single response line.
    async fn call(&self, address: &str, request: RpcRequest<'_>) -> Result<Value, MusterError> {
        let target = format!("{address}:{}", self.rpc_port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&target))
            .await
            .map_err(|_| MusterError::Rpc(format!("connect timeout to {target}")))?
            .map_err(|e| MusterError::Rpc(format!("connect to {target}: {e}")))?;

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MusterError::Rpc(format!("write to {target}: {e}")))?;

        let mut response_line = String::new();
        let mut reader = BufReader::new(reader);
        tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut response_line))
            .await
            .map_err(|_| MusterError::Rpc(format!("read timeout from {target}")))?
            .map_err(|e| MusterError::Rpc(format!("read from {target}: {e}")))?;

        let response: RpcResponse = serde_json::from_str(response_line.trim())?;
        if let Some(error) = response.error {
            return Err(MusterError::Rpc(error));
        }
        Ok(response.result)
    }
}

#[async_trait]
impl ProcessManagerClient for TcpProcessManagerClient {
    async fn instance_state(&self, address: &str) -> Result<AddressState, MusterError> {
        let result = self
            .call(
                address,
                RpcRequest {
                    method: "get_instance_state",
                    params: Value::Null,
                },
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn all_process_info(&self, address: &str) -> Result<Vec<ProcessInfo>, MusterError> {
        let result = self
            .call(
                address,
                RpcRequest {
                    method: "get_all_process_info",
                    params: Value::Null,
                },
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn start_process(
        &self,
        address: &str,
        namespec: &str,
        extra_args: &str,
    ) -> Result<(), MusterError> {
        self.call(
            address,
            RpcRequest {
                method: "start_process",
                params: serde_json::json!({ "namespec": namespec, "extra_args": extra_args }),
            },
        )
        .await?;
        Ok(())
    }

    async fn stop_process(&self, address: &str, namespec: &str) -> Result<(), MusterError> {
        self.call(
            address,
            RpcRequest {
                method: "stop_process",
                params: serde_json::json!({ "namespec": namespec }),
            },
        )
        .await?;
        Ok(())
    }

    async fn restart(&self, address: &str) -> Result<(), MusterError> {
        self.call(
            address,
            RpcRequest {
                method: "restart",
                params: Value::Null,
            },
        )
        .await?;
        Ok(())
    }

    async fn shutdown(&self, address: &str) -> Result<(), MusterError> {
        self.call(
            address,
            RpcRequest {
                method: "shutdown",
                params: Value::Null,
            },
        )
        .await?;
        Ok(())
    }
}
