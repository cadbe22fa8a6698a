use std::collections::HashSet;

use queue_index::{layout, recovery, walker, Config};
use tempfile::tempdir;

const MSG_ID_BYTES: usize = 16;

fn msg_id(byte: u8) -> [u8; MSG_ID_BYTES] {
    [byte; MSG_ID_BYTES]
}

/// Surfaces the `log::debug!`/`warn!` calls recovery and the walker make
/// (recovery's transient-remediation and ack-scatter counts, the
/// broker-start hook's per-directory purge log) when a scenario is run
/// with `RUST_LOG` set. `try_init` tolerates the repeated call across
/// tests in this binary.
fn init_logging() {
    let _ = env_logger::try_init();
}

#[test]
fn cross_segment_publish_produces_two_segments() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queue_dir = dir.path().join("orders");
    let config = Config::default();
    let (_count, mut state) = recovery::init(&queue_dir, config).expect("init");

    state
        .write_published(&msg_id(1), config.segment_span - 1, true)
        .expect("publish tail of segment 0");
    state
        .write_published(&msg_id(2), config.segment_span, true)
        .expect("publish head of segment 1");

    let (lo, next) = state
        .find_lowest_seq_id_seg_and_next_seq_id()
        .expect("bounds");
    assert_eq!(lo, 0);
    assert_eq!(next, config.segment_span + 1);

    assert!(queue_dir.join("000000000.idx").exists());
    assert!(queue_dir.join("000000001.idx").exists());
    state.terminate().expect("terminate");
}

#[test]
fn journal_high_water_mark_triggers_eager_flush_and_full_deletion() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queue_dir = dir.path().join("orders");
    // Keep the default journal_high_water_mark but shrink segment_span so
    // the fixture stays small while still crossing one JOURNAL_HWM worth
    // of acks across several segments.
    let config = Config {
        segment_span: 4096,
        ..Config::default()
    };
    let (_count, mut state) = recovery::init(&queue_dir, config).expect("init");

    let total = 2 * config.journal_high_water_mark as u64;
    for seq in 0..total {
        state
            .write_published(&msg_id((seq % 251) as u8), seq, true)
            .expect("publish");
        state.write_delivered(seq).expect("deliver");
    }

    let all: Vec<u64> = (0..total).collect();
    // A single write_acks call crossing the high-water mark must trigger
    // at least one eager flush internally, not merely buffer everything.
    state.write_acks(&all).expect("ack all");
    while state.flush_journal().expect("flush") {}

    let (lo, next) = state
        .find_lowest_seq_id_seg_and_next_seq_id()
        .expect("bounds");
    assert_eq!((lo, next), (0, 0));
    state.terminate().expect("terminate");
}

#[test]
fn terminate_then_init_is_observably_equivalent() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queue_dir = dir.path().join("orders");
    let config = Config {
        segment_span: 8,
        ..Config::default()
    };
    let (_count, mut state) = recovery::init(&queue_dir, config).expect("init");

    for seq in 0..20u64 {
        state
            .write_published(&msg_id(seq as u8), seq, seq % 2 == 0)
            .expect("publish");
    }
    state.write_delivered(0).expect("deliver 0");
    state.write_delivered(1).expect("deliver 1");
    state.write_acks(&[1]).expect("ack 1");
    while state.flush_journal().expect("flush") {}

    let before_bounds = state
        .find_lowest_seq_id_seg_and_next_seq_id()
        .expect("bounds before");
    let mut before_entries = Vec::new();
    for seg in 0..3 {
        before_entries.push(
            state
                .read_segment_entries(seg * config.segment_span)
                .expect("read before"),
        );
    }
    state.terminate().expect("terminate");

    let (_count, mut state) = recovery::init(&queue_dir, config).expect("reinit");
    let after_bounds = state
        .find_lowest_seq_id_seg_and_next_seq_id()
        .expect("bounds after");
    assert_eq!(before_bounds, after_bounds);

    for (seg, expected) in before_entries.into_iter().enumerate() {
        let actual = state
            .read_segment_entries(seg as u64 * config.segment_span)
            .expect("read after");
        assert_eq!(actual, expected);
    }
    state.terminate().expect("terminate");
}

#[test]
fn acking_the_same_seq_id_twice_is_idempotent() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queue_dir = dir.path().join("orders");
    let config = Config::default();
    let (_count, mut state) = recovery::init(&queue_dir, config).expect("init");

    state.write_published(&msg_id(1), 0, true).expect("publish");
    state.write_delivered(0).expect("deliver");
    state.write_acks(&[0]).expect("ack once");
    state.write_acks(&[0, 0]).expect("ack twice more, same id");
    while state.flush_journal().expect("flush") {}

    let entries = state.read_segment_entries(0).expect("read");
    assert!(entries.is_empty());
    state.terminate().expect("terminate");
}

#[test]
fn read_segment_entries_excludes_acks_still_sitting_in_the_journal() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queue_dir = dir.path().join("orders");
    let config = Config::default();
    let (_count, mut state) = recovery::init(&queue_dir, config).expect("init");

    state.write_published(&msg_id(1), 0, true).expect("publish");
    state.write_delivered(0).expect("deliver");
    state.write_acks(&[0]).expect("ack, not yet flushed");

    // No flush_journal call: the ack is still only in AckJournal's
    // in-memory grouping. Journaled acks are authoritative per spec, so
    // this must already read as acked rather than waiting for a scatter.
    let entries = state.read_segment_entries(0).expect("read");
    assert!(entries.is_empty());
    state.terminate().expect("terminate");
}

#[test]
fn read_segment_entries_is_ascending_and_excludes_acked() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queue_dir = dir.path().join("orders");
    let config = Config::default();
    let (_count, mut state) = recovery::init(&queue_dir, config).expect("init");

    for seq in [5u64, 1, 3, 0, 4, 2] {
        state
            .write_published(&msg_id(seq as u8), seq, true)
            .expect("publish");
    }
    state.write_delivered(2).expect("deliver 2");
    state.write_acks(&[2]).expect("ack 2");
    while state.flush_journal().expect("flush") {}

    let entries = state.read_segment_entries(0).expect("read");
    let seq_ids: Vec<u64> = entries.iter().map(|e| e.seq_id).collect();
    assert_eq!(seq_ids, vec![0, 1, 3, 4, 5]);
    assert!(!seq_ids.contains(&2));
    state.terminate().expect("terminate");
}

#[test]
fn next_segment_boundary_is_smallest_multiple_above() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queue_dir = dir.path().join("orders");
    let config = Config::default();
    let (_count, state) = recovery::init(&queue_dir, config).expect("init");

    assert_eq!(state.next_segment_boundary(0), config.segment_span);
    assert_eq!(
        state.next_segment_boundary(config.segment_span - 1),
        config.segment_span
    );
    assert_eq!(
        state.next_segment_boundary(config.segment_span),
        2 * config.segment_span
    );
    state.terminate().expect("terminate");
}

#[test]
fn walker_visits_multiple_durable_queues_in_order() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let queues_root = dir.path().join("queues");
    std::fs::create_dir_all(&queues_root).unwrap();
    let config = Config::default();

    for (name, first_byte) in [("orders", 1u8), ("payments", 9u8)] {
        let queue_dir = layout::queue_dir(&queues_root, name);
        let (_count, mut state) = recovery::init(&queue_dir, config).expect("init");
        state
            .write_published(&msg_id(first_byte), 0, true)
            .expect("publish");
        state.terminate().expect("terminate");
    }

    let mut durable_queues = HashSet::new();
    durable_queues.insert("orders".to_string());
    durable_queues.insert("payments".to_string());

    let entries: Vec<walker::WalkEntry> =
        walker::broker_start(queues_root, &durable_queues, config)
            .expect("broker_start")
            .collect::<queue_index::Result<Vec<_>>>()
            .expect("walk");

    assert_eq!(entries.len(), 2);
    assert!(!entries.last().unwrap().continuation);
}
