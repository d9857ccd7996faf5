//! Reload orchestrator scenarios against a scripted engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use wing::lifecycle::Shutdown;
use wing::reload::{
    reload_queue, ActiveConfig, Orchestrator, OrchestratorError, OrchestratorState, ReloadOutcome,
    ReloadSender,
};

mod common;
use common::{config, MockFactory, Script};

struct Harness {
    script: Arc<Script>,
    sender: ReloadSender,
    active: ActiveConfig,
    shutdown: Shutdown,
    state: tokio::sync::watch::Receiver<OrchestratorState>,
    task: JoinHandle<Result<(), OrchestratorError>>,
}

async fn start(initial_port: u16) -> Harness {
    let script = Script::new();
    let (sender, receiver) = reload_queue(16);
    let active = ActiveConfig::new();
    let shutdown = Shutdown::new();

    let orchestrator = Orchestrator::new(MockFactory::new(script.clone()), receiver, sender.clone())
        .with_active_config(active.clone());
    let state = orchestrator.subscribe_state();
    let task = tokio::spawn(orchestrator.run(config(initial_port), shutdown.subscribe()));

    let reader = active.clone();
    assert!(common::eventually(|| reader.load().is_some()).await);

    Harness {
        script,
        sender,
        active,
        shutdown,
        state,
        task,
    }
}

fn active_port(active: &ActiveConfig) -> Option<u16> {
    active.load().map(|c| c.global.tproxy_port)
}

#[tokio::test]
async fn test_successful_reload() {
    let h = start(1000).await;
    assert_eq!(*h.state.borrow(), OrchestratorState::Serving);

    let outcome = h.sender.submit(config(1001)).await.unwrap();
    assert_eq!(outcome, ReloadOutcome::Applied);

    assert_eq!(active_port(&h.active), Some(1001));
    assert_eq!(*h.state.borrow(), OrchestratorState::Serving);
    assert_eq!(h.script.constructed(), vec![1000, 1001]);
    // Old engine closed, resources carried over rather than reloaded
    assert_eq!(h.script.count(&h.script.closes), 1);
    assert_eq!(h.script.count(&h.script.reused), 1);
    assert_eq!(h.script.count(&h.script.injections), 1);
    assert_eq!(h.script.count(&h.script.released), 0);

    h.shutdown.trigger();
    h.task.await.unwrap().unwrap();
    assert_eq!(h.script.count(&h.script.closes), 2);
    assert_eq!(h.script.count(&h.script.released), 1);
    assert!(h.active.load().is_none());
}

#[tokio::test]
async fn test_failed_reload_rolls_back() {
    let h = start(1000).await;
    h.script.fail_port(1001);

    let outcome = h.sender.submit(config(1001)).await.unwrap();
    match outcome {
        ReloadOutcome::RolledBack { error } => assert!(error.contains("port 1001")),
        other => panic!("expected rollback, got {:?}", other),
    }

    // The previous configuration serves again on the same resources
    assert_eq!(active_port(&h.active), Some(1000));
    assert_eq!(h.script.constructed(), vec![1000, 1000]);
    assert_eq!(h.script.count(&h.script.released), 0);
    assert_eq!(h.script.count(&h.script.injections), 1);

    // Still accepting requests
    let outcome = h.sender.submit(config(1002)).await.unwrap();
    assert_eq!(outcome, ReloadOutcome::Applied);
    assert_eq!(active_port(&h.active), Some(1002));

    h.shutdown.trigger();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_rollback_is_fatal() {
    let h = start(1000).await;
    h.script.fail_port(1000);
    h.script.fail_port(1001);

    let outcome = h.sender.submit(config(1001)).await.unwrap();
    assert!(matches!(outcome, ReloadOutcome::Fatal { .. }));

    let result = h.task.await.unwrap();
    assert!(matches!(result, Err(OrchestratorError::RollbackFailed { .. })));
    assert_eq!(h.script.count(&h.script.released), 1);
    assert_eq!(*h.state.borrow(), OrchestratorState::Closing);

    // No further requests are processed
    assert!(h.sender.is_closed());
    assert!(h.sender.submit(config(1002)).await.is_err());
    assert_eq!(h.script.count(&h.script.constructs), 3);
}

#[tokio::test]
async fn test_listener_crash_stops_orchestrator() {
    let h = start(1000).await;
    h.script.crash_listener();

    let result = h.task.await.unwrap();
    assert!(matches!(result, Err(OrchestratorError::ListenerFailed(_))));
    assert!(h.sender.is_closed());
    assert!(h.active.load().is_none());
}

#[tokio::test]
async fn test_requests_during_reload_keep_order() {
    let h = start(1000).await;
    h.script.set_construct_delay(Duration::from_millis(20));

    let mut receivers = Vec::new();
    for port in [1001u16, 1002, 1003] {
        let (_, outcome) = h.sender.enqueue(config(port)).await.unwrap();
        receivers.push(outcome);
    }
    for outcome in receivers {
        assert_eq!(outcome.await.unwrap(), ReloadOutcome::Applied);
    }

    assert_eq!(h.script.constructed(), vec![1000, 1001, 1002, 1003]);
    assert_eq!(active_port(&h.active), Some(1003));

    h.shutdown.trigger();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_answers_queued_requests() {
    let h = start(1000).await;
    h.script.set_construct_delay(Duration::from_millis(200));

    let (_, in_flight) = h.sender.enqueue(config(1001)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Still in the channel while the first reload constructs
    let (_, second) = h.sender.enqueue(config(1002)).await.unwrap();
    let (_, third) = h.sender.enqueue(config(1003)).await.unwrap();
    h.shutdown.trigger();

    for outcome in [in_flight, second, third] {
        match outcome.await.unwrap() {
            ReloadOutcome::Fatal { error } => assert_eq!(error, "control plane shut down"),
            other => panic!("expected fatal outcome, got {:?}", other),
        }
    }
    h.task.await.unwrap().unwrap();
    assert_eq!(h.script.constructed(), vec![1000, 1001]);
}

#[tokio::test]
async fn test_dns_cache_carried_only_when_compatible() {
    let h = start(1000).await;

    h.sender.submit(config(1001)).await.unwrap();
    assert_eq!(h.script.count(&h.script.dns_carried), 1);

    let mut ipv6 = (*config(1002)).clone();
    ipv6.dns.ip_version_prefer = 6;
    h.sender.submit(Arc::new(ipv6)).await.unwrap();
    assert_eq!(h.script.count(&h.script.dns_carried), 1);

    h.shutdown.trigger();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_startup_failure() {
    let script = Script::new();
    script.fail_port(1000);
    let (sender, receiver) = reload_queue(16);
    let orchestrator = Orchestrator::new(MockFactory::new(script.clone()), receiver, sender.clone());

    let result = orchestrator.run(config(1000), Shutdown::new().subscribe()).await;
    assert!(matches!(result, Err(OrchestratorError::Startup(_))));
    assert!(sender.is_closed());
}
