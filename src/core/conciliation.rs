// src/core/conciliation.rs

//! Policy functions resolving processes observed running on several hosts at
//! once. Invoked by the master when the FSM enters CONCILIATION.

use crate::core::context::Context;
use crate::core::failure::FailureHandler;
use crate::core::messages::RequestPusher;
use crate::core::rules::RunningFailureStrategy;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::{info, warn};

/// The configured reaction to a process conflict.
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
pub enum ConciliationStrategy {
    /// Stop the oldest runners, keep the youngest.
    Senicide,
    /// Stop the youngest runners, keep the oldest.
    Infanticide,
    /// No action; surface the conflict for manual intervention.
    #[default]
    User,
    /// Stop every instance.
    Stop,
    /// Stop every instance, then restart per normal placement rules.
    Restart,
    /// Delegate to each process's running-failure strategy.
    RunningFailure,
}

/// One conflicted process, flattened out of the Context so the policy can act
/// without holding borrows on it.
struct Conflict {
    namespec: String,
    application_name: String,
    /// (start timestamp on the host of observation, host address).
    runners: Vec<(u64, String)>,
    running_failure_strategy: RunningFailureStrategy,
}

/// Applies the configured strategy to every current conflict, emitting
/// STOP_PROCESS requests and queueing follow-up work on the failure handler.
pub fn conciliate(
    strategy: ConciliationStrategy,
    ctx: &mut Context,
    requests: &RequestPusher,
    failure: &mut FailureHandler,
) {
    let conflicts: Vec<Conflict> = ctx
        .conflicts()
        .iter()
        .map(|process| {
            let mut runners: Vec<(u64, String)> = process
                .running_addresses()
                .iter()
                .map(|address| {
                    let start = process
                        .record(address)
                        .map(|record| record.start)
                        .unwrap_or(0);
                    (start, address.clone())
                })
                .collect();
            // Age ordering: start timestamp first, host address breaks ties.
            runners.sort();
            Conflict {
                namespec: process.namespec(),
                application_name: process.application_name().to_string(),
                runners,
                running_failure_strategy: process.rules().running_failure_strategy,
            }
        })
        .collect();

    for conflict in conflicts {
        info!(
            "Conciliating '{}' running on {:?} with strategy {}.",
            conflict.namespec,
            conflict.runners,
            strategy
        );
        match strategy {
            ConciliationStrategy::Senicide => {
                stop_all_but_last(&conflict, requests);
            }
            ConciliationStrategy::Infanticide => {
                stop_all_but_first(&conflict, requests);
            }
            ConciliationStrategy::User => {
                warn!(
                    "Conflict on '{}' left for manual intervention.",
                    conflict.namespec
                );
            }
            ConciliationStrategy::Stop => {
                stop_all(&conflict, requests);
            }
            ConciliationStrategy::Restart => {
                stop_all(&conflict, requests);
                ctx.mark_process(&conflict.namespec);
                failure.add_job(
                    &conflict.namespec,
                    &conflict.application_name,
                    RunningFailureStrategy::RestartProcess,
                );
            }
            ConciliationStrategy::RunningFailure => match conflict.running_failure_strategy {
                RunningFailureStrategy::Continue => {
                    info!(
                        "Conflict on '{}' ignored per its running-failure strategy.",
                        conflict.namespec
                    );
                }
                delegated => {
                    stop_all(&conflict, requests);
                    if delegated == RunningFailureStrategy::RestartProcess {
                        ctx.mark_process(&conflict.namespec);
                    }
                    failure.add_job(&conflict.namespec, &conflict.application_name, delegated);
                }
            },
        }
    }
}

fn stop_all(conflict: &Conflict, requests: &RequestPusher) {
    for (_, address) in &conflict.runners {
        requests.stop_process(address, &conflict.namespec);
    }
}

/// Keeps the youngest runner (latest start, lexically greatest on ties).
fn stop_all_but_last(conflict: &Conflict, requests: &RequestPusher) {
    if let Some((keep, stop)) = conflict.runners.split_last() {
        info!("Keeping '{}' on {}.", conflict.namespec, keep.1);
        for (_, address) in stop {
            requests.stop_process(address, &conflict.namespec);
        }
    }
}

/// Keeps the oldest runner (earliest start, lexically smallest on ties).
fn stop_all_but_first(conflict: &Conflict, requests: &RequestPusher) {
    if let Some((keep, stop)) = conflict.runners.split_first() {
        info!("Keeping '{}' on {}.", conflict.namespec, keep.1);
        for (_, address) in stop {
            requests.stop_process(address, &conflict.namespec);
        }
    }
}
