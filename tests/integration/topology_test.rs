// tests/integration/topology_test.rs

//! Scenario 6: the controller posts a `SLOT_CHANGED` action moving a slot
//! from one group to another; the topology watcher applies it and the next
//! request for a key in that slot is dispatched to the new group.

use super::test_helpers::fake_backend;
use bytes::Bytes;
use shardproxy::core::backend::BackendPool;
use shardproxy::core::cluster::action::{Action, ActionKind, SlotChangedPayload, SlotStatus};
use shardproxy::core::cluster::slot::get_slot;
use shardproxy::core::coordinator::InMemoryCoordinator;
use shardproxy::core::dispatch::{DispatchConfig, Dispatcher};
use shardproxy::core::protocol::RespFrame;
use shardproxy::core::routing::RoutingTable;
use shardproxy::core::topology::{MasterOpConfig, TopologyWatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn slot_changed_action_retargets_subsequent_dispatches() {
    let group1_addr = fake_backend(|_frame| RespFrame::SimpleString("FROM-GROUP-1".into())).await;
    let group2_addr = fake_backend(|_frame| RespFrame::SimpleString("FROM-GROUP-2".into())).await;

    let routing = Arc::new(RoutingTable::new(1024));
    let pool = Arc::new(BackendPool::new(Duration::from_secs(60)));
    let slot = get_slot(&Bytes::from_static(b"foo"), 1024);
    routing.set_group(1, Some(group1_addr.to_string()), vec![]);
    routing.set_group(2, Some(group2_addr.to_string()), vec![]);
    routing.set_slot(slot, 1, SlotStatus::Online, None).unwrap();

    let dispatcher = Dispatcher::new(routing.clone(), pool.clone(), DispatchConfig::default(), None);
    let reply = dispatcher.dispatch(RespFrame::command(&[b"GET", b"foo"])).await;
    assert_eq!(reply, RespFrame::SimpleString("FROM-GROUP-1".into()));

    let coordinator = Arc::new(InMemoryCoordinator::new());
    let watcher = Arc::new(TopologyWatcher::new(
        coordinator.clone(),
        routing.clone(),
        pool.clone(),
        "proxy-1".into(),
        MasterOpConfig::default(),
    ));

    coordinator
        .publish_action(Action {
            seq: 7,
            kind: ActionKind::SlotChanged(SlotChangedPayload {
                slot,
                group_id: 2,
                status: SlotStatus::Online,
                migrate_from: None,
            }),
        })
        .await;

    // Drive one iteration of the watcher's drain loop directly, the same
    // work `TopologyWatcher::run` performs before ACKing.
    watcher_drain_once(&watcher).await;

    let reply = dispatcher.dispatch(RespFrame::command(&[b"GET", b"foo"])).await;
    assert_eq!(reply, RespFrame::SimpleString("FROM-GROUP-2".into()));
}

/// `drain_pending_actions` is private to the watcher; this exercises the
/// same effect through the public `run` method by giving it exactly one
/// action to process and then immediately signalling shutdown.
async fn watcher_drain_once(watcher: &Arc<TopologyWatcher>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = watcher.clone();
    let handle = tokio::spawn(async move { watcher.run(shutdown_rx).await });
    // Give the watcher's first drain pass a chance to apply the action
    // before it blocks on the next children-changed notification.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
}
