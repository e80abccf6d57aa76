//! Coalescing Scheduler Integration Tests
//!
//! Hammers the scheduler from several producer threads while one consumer
//! thread drains it, and checks the admission and convergence guarantees.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use grid_stream_client::{
    BatchTrigger, GridRow, GridTable, GridView, SchedulerConfig, UpdateScheduler,
};

const PRODUCERS: u32 = 8;
const UPDATES_PER_PRODUCER: u32 = 5_000;
const ROWS: u32 = 64;

/// Trigger that forwards pass requests to a consumer thread and records how
/// many were queued at once.
struct ChannelTrigger {
    tx: mpsc::Sender<()>,
    queued: Arc<AtomicUsize>,
    max_queued: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl BatchTrigger for ChannelTrigger {
    fn request_pass(&self) -> bool {
        let queued = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_queued.fetch_max(queued, Ordering::SeqCst);
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.tx.send(()).is_ok()
    }
}

fn table(rows: u32) -> GridTable {
    let mut table = GridTable::new();
    table.replace_all_rows(
        (0..rows)
            .map(|id| GridRow {
                id,
                ..GridRow::default()
            })
            .collect(),
    );
    table
}

#[test]
fn concurrent_producers_converge_to_last_values() {
    let (tx, rx) = mpsc::channel();
    let queued = Arc::new(AtomicUsize::new(0));
    let max_queued = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));
    let scheduler = Arc::new(UpdateScheduler::new(
        SchedulerConfig {
            backlog_warn_threshold: usize::MAX,
            slow_batch_threshold: Duration::from_secs(1),
        },
        ChannelTrigger {
            tx,
            queued: Arc::clone(&queued),
            max_queued: Arc::clone(&max_queued),
            requests: Arc::clone(&requests),
        },
    ));
    let producers_done = Arc::new(AtomicBool::new(false));

    let consumer = {
        let scheduler = Arc::clone(&scheduler);
        let queued = Arc::clone(&queued);
        let producers_done = Arc::clone(&producers_done);
        thread::spawn(move || {
            let mut view = table(ROWS);
            let mut passes = 0_usize;
            loop {
                match rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(()) => {
                        queued.fetch_sub(1, Ordering::SeqCst);
                        scheduler.process_pending(&mut view);
                        passes += 1;
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if producers_done.load(Ordering::SeqCst)
                            && scheduler.backlog() == 0
                            && !scheduler.is_pass_scheduled()
                        {
                            break;
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            (view, passes)
        })
    };

    // Each producer owns the `quantity` column of its own rows and writes an
    // increasing sequence, so the final value of every cell is known.
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for seq in 0..UPDATES_PER_PRODUCER {
                    let row = producer + PRODUCERS * (seq % (ROWS / PRODUCERS));
                    scheduler.submit_update(row, "quantity", seq.to_string());
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    producers_done.store(true, Ordering::SeqCst);

    let (view, passes) = consumer.join().unwrap();

    // Never more than one pass queued.
    assert_eq!(max_queued.load(Ordering::SeqCst), 1);
    assert_eq!(requests.load(Ordering::SeqCst), passes);
    assert_eq!(scheduler.backlog(), 0);

    let rows_per_producer = ROWS / PRODUCERS;
    for producer in 0..PRODUCERS {
        for slot in 0..rows_per_producer {
            let row = producer + PRODUCERS * slot;
            let last_seq = (0..UPDATES_PER_PRODUCER)
                .rev()
                .find(|seq| seq % rows_per_producer == slot)
                .unwrap();
            assert_eq!(
                view.rows()[row as usize].quantity,
                i64::from(last_seq),
                "row {row}"
            );
        }
    }

    let totals = scheduler.metrics().totals();
    assert_eq!(
        totals.updates_received,
        u64::from(PRODUCERS * UPDATES_PER_PRODUCER)
    );
    assert_eq!(
        totals.updates_applied + totals.coalesced,
        totals.updates_received
    );
}

#[test]
fn burst_without_consumer_schedules_exactly_once() {
    let (tx, rx) = mpsc::channel();
    let requests = Arc::new(AtomicUsize::new(0));
    let scheduler = Arc::new(UpdateScheduler::new(
        SchedulerConfig::default(),
        ChannelTrigger {
            tx,
            queued: Arc::new(AtomicUsize::new(0)),
            max_queued: Arc::new(AtomicUsize::new(0)),
            requests: Arc::clone(&requests),
        },
    ));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for seq in 0..1_000_u32 {
                    scheduler.submit_update(producer, "price", format!("{seq}.5"));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.backlog(), PRODUCERS as usize);
    assert!(scheduler.is_pass_scheduled());

    rx.recv().unwrap();
    let mut view = table(PRODUCERS);
    let outcome = scheduler.process_pending(&mut view).unwrap();
    assert_eq!(outcome.applied, PRODUCERS as usize);
    assert!(outcome.had_coalescing);
    for row in view.rows() {
        assert_eq!(row.price, 999.5);
    }
    assert!(!scheduler.is_pass_scheduled());
    assert!(rx.try_recv().is_err());
}
