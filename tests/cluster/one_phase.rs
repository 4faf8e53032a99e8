//! One-Phase Commit Tests
//!
//! With one-phase commit the prepare carries the commit: every participant
//! prepares and applies in one round.

use crate::*;
use gridkv::gridkv_core::GlobalTransaction;
use gridkv::gridkv_engine::Notifier;
use parking_lot::Mutex;
use std::sync::Arc;

fn one_phase_config() -> GridConfig {
    let mut config = GridConfig::clustered(CacheMode::Replicated);
    config.transaction.one_phase_commit = true;
    config
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Registered { local: bool },
    Completed { committed: bool },
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(GlobalTransaction, Event)>>,
}

impl Recorder {
    fn events_of(&self, gtx: &GlobalTransaction) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(g, _)| g == gtx)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl Notifier for Recorder {
    fn transaction_registered(&self, gtx: &GlobalTransaction, is_origin_local: bool) {
        self.events.lock().push((
            gtx.clone(),
            Event::Registered {
                local: is_origin_local,
            },
        ));
    }

    fn transaction_completed(&self, gtx: &GlobalTransaction, committed: bool) {
        self.events
            .lock()
            .push((gtx.clone(), Event::Completed { committed }));
    }
}

#[test]
fn test_one_phase_commit_applies_everywhere() {
    let c = TestCluster::start(&["a", "b", "c"], one_phase_config());

    let tx = c.grid("c").begin().unwrap();
    tx.put("x", 1i64).unwrap();
    tx.put("y", 2i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(c.copies("x"), vec![int(1), int(1), int(1)]);
    assert_eq!(c.copies("y"), vec![int(2), int(2), int(2)]);
    assert_eq!(c.locks_held(), 0);
    assert_eq!(c.live_transactions(), 0);
    for grid in &c.grids {
        assert_eq!(grid.stats().transactions.rolled_back, 0);
    }
}

#[test]
fn test_one_phase_rollback_before_commit() {
    let c = TestCluster::start(&["a", "b"], one_phase_config());

    let tx = c.grid("b").begin().unwrap();
    tx.put("x", 1i64).unwrap();
    tx.rollback().unwrap();

    assert_eq!(c.copies("x"), vec![None, None]);
    assert_eq!(c.live_transactions(), 0);
}

#[test]
fn test_participant_reports_registration_and_completion() {
    init_tracing();
    let cluster = LocalCluster::new();
    let recorder = Arc::new(Recorder::default());
    let origin = Grid::builder()
        .config(one_phase_config())
        .transport(cluster.transport("a"))
        .build()
        .unwrap();
    let participant = Grid::builder()
        .config(one_phase_config())
        .transport(cluster.transport("b"))
        .notifier(recorder.clone())
        .build()
        .unwrap();
    cluster.install_view(&["a", "b"], false);

    let tx = origin.begin().unwrap();
    let gtx = tx.gtx().clone();
    tx.put("k", 1i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(
        recorder.events_of(&gtx),
        vec![
            Event::Registered { local: false },
            Event::Completed { committed: true },
        ]
    );
    assert_eq!(participant.get("k").unwrap(), int(1));

    let local = participant.begin().unwrap();
    let local_gtx = local.gtx().clone();
    local.put("k", 2i64).unwrap();
    local.commit().unwrap();
    assert_eq!(
        recorder.events_of(&local_gtx),
        vec![
            Event::Registered { local: true },
            Event::Completed { committed: true },
        ]
    );
}
