// src/core/mainloop.rs

//! The I/O worker bridging the transport to the agent task. It polls the
//! internal subscriber and the deferred-request puller on a 500 ms budget,
//! forwards everything it receives as agent events, and executes out-of-band
//! actions against remote process managers. It never touches agent state.

use crate::core::address::AddressState;
use crate::core::events::EventBus;
use crate::core::messages::{AgentEvent, DeferredRequest, WireMessage};
use crate::core::rpc::ProcessManagerClient;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// The poll budget: shutdown is observed at the next boundary.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// The receive side of the internal bus. The wire transport implements this;
/// tests substitute an in-memory fake.
#[async_trait]
pub trait InternalSubscriber: Send {
    /// The next message from the bus. `None` means the stream has ended.
    async fn recv(&mut self) -> Option<WireMessage>;

    /// Tears down the subscriptions to the named peers.
    fn disconnect(&mut self, addresses: &[String]);
}

/// The outcome of one poll iteration.
enum Step {
    /// The loop flag changed, or its sender is gone.
    Shutdown(bool),
    Subscribed(Option<WireMessage>),
    Requested(Option<DeferredRequest>),
    Idle,
}

pub struct MainLoop<S: InternalSubscriber, C: ProcessManagerClient> {
    subscriber: S,
    rpc: C,
    requests: mpsc::UnboundedReceiver<DeferredRequest>,
    agent_events: mpsc::UnboundedSender<AgentEvent>,
    bus: Arc<EventBus>,
}

/// Handle on a started main loop. Only obtainable from `start`, so `stop` is
/// only callable after it.
pub struct MainLoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MainLoopHandle {
    /// Flips the loop flag and joins the worker. The loop notices at the next
    /// 500 ms poll boundary.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Main loop terminated abnormally: {e}");
        }
    }
}

impl<S, C> MainLoop<S, C>
where
    S: InternalSubscriber + Sync + 'static,
    C: ProcessManagerClient + 'static,
{
    pub fn new(
        subscriber: S,
        rpc: C,
        requests: mpsc::UnboundedReceiver<DeferredRequest>,
        agent_events: mpsc::UnboundedSender<AgentEvent>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            subscriber,
            rpc,
            requests,
            agent_events,
            bus,
        }
    }

    /// Spawns the worker task and returns the handle used to stop it.
    pub fn start(self) -> MainLoopHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        MainLoopHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Main loop started.");
        loop {
            // One poll iteration; all real work happens after the pending
            // futures are dropped.
            let step = tokio::select! {
                changed = shutdown.changed() => Step::Shutdown(changed.is_err()),
                message = self.subscriber.recv() => Step::Subscribed(message),
                request = self.requests.recv() => Step::Requested(request),
                _ = time::sleep(POLL_TIMEOUT) => Step::Idle,
            };
            match step {
                Step::Shutdown(sender_gone) => {
                    if sender_gone || *shutdown.borrow() {
                        info!("Main loop shutting down.");
                        return;
                    }
                }
                Step::Subscribed(Some(message)) => self.forward(message),
                Step::Subscribed(None) => {
                    warn!("Internal subscriber stream ended; main loop exiting.");
                    return;
                }
                Step::Requested(Some(request)) => self.handle_request(request).await,
                Step::Requested(None) => {
                    info!("Deferred request channel closed; main loop exiting.");
                    return;
                }
                Step::Idle => {}
            }
        }
    }

    /// Re-posts a subscriber message so that all processing happens on the
    /// agent task.
    fn forward(&self, message: WireMessage) {
        let event = match message {
            WireMessage::Tick { address, when } => AgentEvent::Tick { address, when },
            WireMessage::Process { address, event } => AgentEvent::Process { address, event },
            WireMessage::Auth {
                address,
                authorized,
            } => AgentEvent::Authorization {
                address,
                authorized,
            },
            WireMessage::Info { address, processes } => {
                AgentEvent::Info { address, processes }
            }
            other => {
                debug!("Ignored subscriber message: {other:?}.");
                return;
            }
        };
        if self.agent_events.send(event).is_err() {
            warn!("Agent event channel closed; dropping message.");
        }
    }

    /// Executes one deferred request. RPC failures are swallowed: the caller's
    /// CHECKING host ages out through the silence timer.
    async fn handle_request(&mut self, request: DeferredRequest) {
        match request {
            DeferredRequest::CheckAddress(address) => self.check_address(&address).await,
            DeferredRequest::IsolateAddresses(addresses) => {
                info!("Disconnecting isolated addresses {:?}.", addresses);
                self.subscriber.disconnect(&addresses);
            }
            DeferredRequest::StartProcess {
                address,
                namespec,
                extra_args,
            } => {
                if let Err(e) = self
                    .rpc
                    .start_process(&address, &namespec, &extra_args)
                    .await
                {
                    warn!("start_process('{namespec}') on {address} failed: {e}");
                }
            }
            DeferredRequest::StopProcess { address, namespec } => {
                if let Err(e) = self.rpc.stop_process(&address, &namespec).await {
                    warn!("stop_process('{namespec}') on {address} failed: {e}");
                }
            }
            DeferredRequest::Restart(address) => {
                if let Err(e) = self.rpc.restart(&address).await {
                    warn!("restart of {address} failed: {e}");
                }
            }
            DeferredRequest::Shutdown(address) => {
                if let Err(e) = self.rpc.shutdown(&address).await {
                    warn!("shutdown of {address} failed: {e}");
                }
            }
        }
    }

    /// The authorization round trip. A peer that reports itself isolating or
    /// isolated is refused; anything else gets its process snapshot adopted.
    /// On RPC failure no authorization event is emitted at all.
    async fn check_address(&self, address: &str) {
        let state = match self.rpc.instance_state(address).await {
            Ok(state) => state,
            Err(e) => {
                debug!("instance_state of {address} failed: {e}");
                return;
            }
        };
        if matches!(state, AddressState::Isolating | AddressState::Isolated) {
            info!("Address {address} reports state {state}; refusing authorization.");
            self.emit_authorization(address, false);
            return;
        }

        let processes = match self.rpc.all_process_info(address).await {
            Ok(processes) => processes,
            Err(e) => {
                debug!("all_process_info of {address} failed: {e}");
                return;
            }
        };
        // Info precedes the authorization so the snapshot is in place when
        // the verdict lands.
        self.bus.process_info(address, processes.clone());
        if self
            .agent_events
            .send(AgentEvent::Info {
                address: address.to_string(),
                processes,
            })
            .is_err()
        {
            warn!("Agent event channel closed; dropping info for {address}.");
        }
        self.emit_authorization(address, true);
    }

    fn emit_authorization(&self, address: &str, authorized: bool) {
        self.bus.authorization(address, authorized);
        if self
            .agent_events
            .send(AgentEvent::Authorization {
                address: address.to_string(),
                authorized,
            })
            .is_err()
        {
            warn!("Agent event channel closed; dropping authorization for {address}.");
        }
    }
}
