// src/core/mod.rs

//! The central module containing the core logic and data structures of Muster.

pub mod address;
pub mod agent;
pub mod application;
pub mod conciliation;
pub mod context;
pub mod deployer;
pub mod errors;
pub mod events;
pub mod failure;
pub mod fsm;
pub mod mainloop;
pub mod messages;
pub mod process;
pub mod rpc;
pub mod rules;

pub use errors::MusterError;
pub use fsm::SupervisorState;
pub use messages::WireMessage;
