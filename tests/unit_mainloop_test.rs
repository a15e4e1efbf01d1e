// tests/unit_mainloop_test.rs

mod common;

use common::{ChannelSubscriber, FakeRpc, info};
use muster::core::address::AddressState;
use muster::core::events::EventBus;
use muster::core::mainloop::{MainLoop, MainLoopHandle};
use muster::core::messages::{AgentEvent, ProcessInfo, RequestPusher, WireMessage};
use muster::core::process::ProcessState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

struct LoopUnderTest {
    pusher: RequestPusher,
    subscriber_tx: mpsc::UnboundedSender<WireMessage>,
    agent_rx: mpsc::UnboundedReceiver<AgentEvent>,
    bus_rx: broadcast::Receiver<WireMessage>,
    rpc: FakeRpc,
    disconnected: Arc<Mutex<Vec<Vec<String>>>>,
    handle: MainLoopHandle,
}

fn start_loop(rpc: FakeRpc) -> LoopUnderTest {
    let (subscriber_tx, subscriber) = ChannelSubscriber::new();
    let disconnected = subscriber.disconnected.clone();
    let (pusher, request_rx) = RequestPusher::new();
    let (agent_tx, agent_rx) = mpsc::unbounded_channel();
    let bus = Arc::new(EventBus::new());
    let bus_rx = bus.subscribe();

    let handle = MainLoop::new(subscriber, rpc.clone(), request_rx, agent_tx, bus).start();
    LoopUnderTest {
        pusher,
        subscriber_tx,
        agent_rx,
        bus_rx,
        rpc,
        disconnected,
        handle,
    }
}

async fn next_agent_event(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> AgentEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an agent event")
        .expect("agent event channel closed")
}

/// Waits until the fake RPC has recorded a call containing `needle`.
async fn wait_for_call(rpc: &FakeRpc, needle: &str) {
    for _ in 0..200 {
        if rpc.state.lock().calls.iter().any(|c| c.contains(needle)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("RPC call '{needle}' never happened");
}

#[tokio::test]
async fn test_check_address_happy_path_sends_info_then_auth() {
    let rpc = FakeRpc::new();
    rpc.state.lock().infos.insert(
        "10.0.0.2".to_string(),
        vec![info("app", "proc", ProcessState::Running, 7, 100)],
    );
    let mut t = start_loop(rpc);

    t.pusher.check_address("10.0.0.2");

    // The info bootstrap precedes the verdict.
    let first = next_agent_event(&mut t.agent_rx).await;
    match first {
        AgentEvent::Info { address, processes } => {
            assert_eq!(address, "10.0.0.2");
            assert_eq!(processes.len(), 1);
        }
        other => panic!("expected the info bootstrap first, got {other:?}"),
    }
    let second = next_agent_event(&mut t.agent_rx).await;
    assert_eq!(
        second,
        AgentEvent::Authorization {
            address: "10.0.0.2".to_string(),
            authorized: true,
        }
    );

    // The same pair is published on the bus for observers.
    let published: Vec<WireMessage> = [t.bus_rx.recv().await.unwrap(), t.bus_rx.recv().await.unwrap()].into();
    assert!(matches!(published[0], WireMessage::Info { .. }));
    assert!(matches!(
        published[1],
        WireMessage::Auth {
            authorized: true,
            ..
        }
    ));

    t.handle.stop().await;
}

#[tokio::test]
async fn test_s5_authorization_denied_for_an_isolated_peer() {
    let rpc = FakeRpc::new();
    rpc.state
        .lock()
        .states
        .insert("10.0.0.3".to_string(), AddressState::Isolated);
    let mut t = start_loop(rpc);

    t.pusher.check_address("10.0.0.3");

    // No info message: the refusal comes straight away.
    let event = next_agent_event(&mut t.agent_rx).await;
    assert_eq!(
        event,
        AgentEvent::Authorization {
            address: "10.0.0.3".to_string(),
            authorized: false,
        }
    );
    let published = t.bus_rx.recv().await.unwrap();
    assert_eq!(
        published,
        WireMessage::Auth {
            address: "10.0.0.3".to_string(),
            authorized: false,
        }
    );
    // The process list was never fetched.
    assert!(
        !t.rpc
            .state
            .lock()
            .calls
            .iter()
            .any(|c| c.starts_with("all_process_info"))
    );

    t.handle.stop().await;
}

#[tokio::test]
async fn test_check_address_swallows_rpc_errors() {
    let rpc = FakeRpc::new();
    rpc.state.lock().failing.insert("10.0.0.4".to_string());
    let mut t = start_loop(rpc);

    t.pusher.check_address("10.0.0.4");
    wait_for_call(&t.rpc, "instance_state 10.0.0.4").await;

    // Use a follow-up request as a fence, then verify nothing was emitted.
    t.pusher.stop_process("10.0.0.9", "app:proc");
    wait_for_call(&t.rpc, "stop_process 10.0.0.9").await;
    assert!(t.agent_rx.try_recv().is_err());

    t.handle.stop().await;
}

#[tokio::test]
async fn test_deferred_requests_reach_the_process_manager() {
    let rpc = FakeRpc::new();
    let t = start_loop(rpc);

    t.pusher.start_process("10.0.0.2", "app:proc", "-v");
    t.pusher.stop_process("10.0.0.2", "app:proc");
    t.pusher.restart("10.0.0.3");
    t.pusher.shutdown("10.0.0.3");

    wait_for_call(&t.rpc, "shutdown 10.0.0.3").await;
    let calls = t.rpc.state.lock().calls.clone();
    assert_eq!(
        calls,
        vec![
            "start_process 10.0.0.2 app:proc -v",
            "stop_process 10.0.0.2 app:proc",
            "restart 10.0.0.3",
            "shutdown 10.0.0.3",
        ]
    );

    t.handle.stop().await;
}

#[tokio::test]
async fn test_isolate_addresses_disconnects_the_subscriber() {
    let rpc = FakeRpc::new();
    let t = start_loop(rpc);

    t.pusher
        .isolate_addresses(vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()]);

    for _ in 0..200 {
        if !t.disconnected.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        *t.disconnected.lock(),
        vec![vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()]]
    );

    t.handle.stop().await;
}

#[tokio::test]
async fn test_subscriber_messages_are_forwarded_to_the_agent() {
    let rpc = FakeRpc::new();
    let mut t = start_loop(rpc);

    // Status publications from peers are not re-ingested.
    t.subscriber_tx
        .send(WireMessage::SupervisorStatus(
            muster::core::messages::SupervisorStatusEvent {
                address: "10.0.0.2".to_string(),
                state: "OPERATION".to_string(),
                master_address: "10.0.0.1".to_string(),
            },
        ))
        .unwrap();
    t.subscriber_tx
        .send(WireMessage::Tick {
            address: "10.0.0.2".to_string(),
            when: 42,
        })
        .unwrap();
    t.subscriber_tx
        .send(WireMessage::Process {
            address: "10.0.0.2".to_string(),
            event: info("app", "proc", ProcessState::Running, 7, 100),
        })
        .unwrap();

    let first = next_agent_event(&mut t.agent_rx).await;
    assert_eq!(
        first,
        AgentEvent::Tick {
            address: "10.0.0.2".to_string(),
            when: 42,
        }
    );
    let second = next_agent_event(&mut t.agent_rx).await;
    assert!(matches!(second, AgentEvent::Process { .. }));

    t.handle.stop().await;
}

#[tokio::test]
async fn test_stop_joins_the_worker() {
    let rpc = FakeRpc::new();
    let t = start_loop(rpc);
    tokio::time::timeout(Duration::from_secs(2), t.handle.stop())
        .await
        .expect("stop did not join the main loop");
}

#[tokio::test]
async fn test_peer_auth_messages_are_forwarded() {
    let rpc = FakeRpc::new();
    let mut t = start_loop(rpc);

    let processes: Vec<ProcessInfo> = vec![info("app", "proc", ProcessState::Stopped, 0, 0)];
    t.subscriber_tx
        .send(WireMessage::Info {
            address: "10.0.0.2".to_string(),
            processes: processes.clone(),
        })
        .unwrap();
    t.subscriber_tx
        .send(WireMessage::Auth {
            address: "10.0.0.2".to_string(),
            authorized: true,
        })
        .unwrap();

    assert_eq!(
        next_agent_event(&mut t.agent_rx).await,
        AgentEvent::Info {
            address: "10.0.0.2".to_string(),
            processes,
        }
    );
    assert_eq!(
        next_agent_event(&mut t.agent_rx).await,
        AgentEvent::Authorization {
            address: "10.0.0.2".to_string(),
            authorized: true,
        }
    );

    t.handle.stop().await;
}
