//! One copy phase: shard the id space, scan shards on the worker pool, drain
//! the queue on a dedicated consumer thread.
//!
//! The dispatcher caps shard tasks in flight and folds finished shards into
//! the phase totals as it waits for room, so shard results never pile up. The
//! last task to finish pushes the end-of-stream marker.

use crate::cancel::Cancellation;
use crate::config::{
    BATCH_SIZE, FLUSH_INTERVAL, MAX_IN_FLIGHT_SHARDS, OFFER_TIMEOUT, OUTPUT_BATCH, POLL_TIMEOUT,
    QUEUE_CAPACITY,
};
use crate::error::CopyError;
use crate::errorlog::ErrorLog;
use crate::queue::{bounded_queue, EndOfStreamLatch, QueueConsumer, QueueStopped};
use crate::scan::{scan_shard, Scanner, ShardEnv};
use crate::shard::{shard, shard_count, Shard};
use crate::stats::{summary_line, PhaseOutcome, PhaseProgress, PhaseStats, ShardStats};
use crossbeam_channel::{unbounded, Receiver};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPool;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Tuning knobs of a phase.
#[derive(Debug, Clone)]
pub struct PhaseSettings {
    pub batch_size: u64,
    pub queue_capacity: usize,
    pub max_in_flight: usize,
    pub offer_timeout: Duration,
    pub poll_timeout: Duration,
    pub flush_interval: u64,
    pub output_batch: u64,
    pub show_progress: bool,
    /// Print the phase total to stdout when the phase ends.
    pub print_summary: bool,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            queue_capacity: QUEUE_CAPACITY,
            max_in_flight: MAX_IN_FLIGHT_SHARDS,
            offer_timeout: OFFER_TIMEOUT,
            poll_timeout: POLL_TIMEOUT,
            flush_interval: FLUSH_INTERVAL,
            output_batch: OUTPUT_BATCH,
            show_progress: false,
            print_summary: false,
        }
    }
}

/// Totals of a finished phase and the first error that stopped it, if any.
#[derive(Debug)]
pub struct PhaseRun {
    pub stats: PhaseStats,
    pub error: Option<CopyError>,
}

impl PhaseRun {
    pub fn into_result(self) -> Result<PhaseStats, (PhaseStats, CopyError)> {
        match self.error {
            None => Ok(self.stats),
            Some(err) => Err((self.stats, err)),
        }
    }
}

struct ShardDone {
    shard: Shard,
    stats: ShardStats,
    stopped: Option<QueueStopped>,
}

/// Runs one phase for `scanner`, feeding accepted records to `consume` on its own thread.
///
/// `consume` receives the queue and the live counters and returns the number
/// of records it loaded.
pub fn run_phase<S, C>(
    scanner: &S,
    pool: &ThreadPool,
    settings: &PhaseSettings,
    cancel: &Cancellation,
    error_log: &ErrorLog,
    consume: C,
) -> PhaseRun
where
    S: Scanner,
    C: FnOnce(&QueueConsumer<S::Entity>, &PhaseProgress) -> Result<u64, CopyError> + Send,
{
    let kind = S::KIND;
    let mut stats = PhaseStats::new(kind);

    let highest = match scanner.highest_id() {
        Ok(highest) => highest,
        Err(e) => {
            stats.finish(false, 0);
            return PhaseRun {
                stats,
                error: Some(CopyError::setup(format!("cannot resolve highest {kind} id"), e)),
            };
        }
    };
    let total_shards = shard_count(highest, settings.batch_size);
    let total_ids = highest.map_or(0, |h| h.saturating_add(1));
    info!(%kind, highest = ?highest, shards = total_shards, "Starting phase");

    let (producer, consumer) = bounded_queue::<S::Entity>(settings.queue_capacity, cancel);
    let producer = producer.with_offer_timeout(settings.offer_timeout);
    let consumer = consumer.with_poll_timeout(settings.poll_timeout);
    let latch = EndOfStreamLatch::new(total_shards);
    if total_shards == 0 {
        if let Err(stopped) = producer.finish() {
            debug!(%kind, reason = %stopped, "End-of-stream marker for empty id space not pushed");
        }
    }

    let progress = PhaseProgress::new();
    let bar = make_progress_bar(total_ids, kind.plural(), settings.show_progress);
    let env = ShardEnv {
        cancel,
        error_log,
        progress: &progress,
        bar: &bar,
        flush_interval: settings.flush_interval,
        output_batch: settings.output_batch,
    };
    let max_in_flight = settings.max_in_flight.max(1);

    let consumed = thread::scope(|s| {
        let consumer_thread = s.spawn(|| {
            let result = catch_unwind(AssertUnwindSafe(|| consume(&consumer, &progress)))
                .unwrap_or_else(|payload| {
                    let err = CopyError::WorkerPanic {
                        phase: format!("{kind} consumer"),
                        message: panic_message(payload.as_ref()),
                    };
                    error_log.record_message(&format!("Consumer: {err}"));
                    Err(err)
                });
            // Producers park on a full queue until the flag is set.
            result.map_err(|err| {
                cancel.cancel(err);
                CopyError::Cancelled
            })
        });

        let (done_tx, done_rx) = unbounded::<ShardDone>();
        pool.in_place_scope(|scope| {
            let mut in_flight = 0usize;
            for shard in shard(highest, settings.batch_size) {
                while in_flight >= max_in_flight {
                    in_flight -= collect_completed(&done_rx, &mut stats, true);
                }
                if cancel.is_cancelled() {
                    debug!(%kind, shard = %shard, "Not submitting shard after cancellation");
                    break;
                }

                in_flight += 1;
                let producer = producer.clone();
                let done_tx = done_tx.clone();
                let env = &env;
                let latch = &latch;
                scope.spawn(move |_| {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        scan_shard(scanner, shard, &producer, env)
                    }));
                    let (shard_stats, stopped) = match outcome {
                        Ok(result) => result,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            error!(
                                %kind,
                                shard = %shard,
                                message = %message,
                                "Scan worker panicked"
                            );
                            env.error_log.record_message(&format!(
                                "Worker: {} {shard} panicked: {message}",
                                kind.plural()
                            ));
                            env.cancel.cancel(CopyError::WorkerPanic {
                                phase: kind.to_string(),
                                message,
                            });
                            if let Err(stopped) = producer.finish() {
                                debug!(
                                    %kind,
                                    shard = %shard,
                                    reason = %stopped,
                                    "End-of-stream marker not pushed"
                                );
                            }
                            (ShardStats::default(), Some(QueueStopped::Cancelled))
                        }
                    };
                    latch.arrive(&producer);
                    let _ = done_tx.send(ShardDone {
                        shard,
                        stats: shard_stats,
                        stopped,
                    });
                });
            }
        });
        drop(producer);
        drop(done_tx);
        collect_completed(&done_rx, &mut stats, false);

        consumer_thread.join().unwrap_or(Err(CopyError::Cancelled))
    });

    let error = match consumed {
        Ok(_) if !cancel.is_cancelled() => None,
        _ => Some(cancel.take_cause().unwrap_or(CopyError::Cancelled)),
    };

    if latch.remaining() > 0 {
        debug!(
            %kind,
            shards_not_finished = latch.remaining(),
            "Phase stopped before every shard ran"
        );
    }
    stats.finish(error.is_none(), progress.loaded());
    bar.finish_and_clear();
    info!(
        %kind,
        emitted = progress.emitted(),
        summary = %stats.summary(),
        "Phase finished"
    );
    if settings.print_summary {
        println!();
        println!("{}", stats.summary());
    }
    PhaseRun { stats, error }
}

/// Folds finished shards into `stats`; blocks for at least one when `wait` is set.
fn collect_completed(done: &Receiver<ShardDone>, stats: &mut PhaseStats, wait: bool) -> usize {
    let mut batch = Vec::new();
    if wait {
        if let Ok(first) = done.recv() {
            batch.push(first);
        }
    }
    batch.extend(done.try_iter());

    for finished in &batch {
        let outcome = match finished.stopped {
            None => PhaseOutcome::Ok,
            Some(_) => PhaseOutcome::Failed,
        };
        let name = format!("{} Batch {}", stats.kind.plural(), finished.shard.index);
        info!("{}", summary_line(&name, outcome, &finished.stats));
    }
    stats.merge(batch.iter().map(|f| &f.stats));
    batch.len()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn make_progress_bar(total: u64, label: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "    {{spinner:.cyan}} {label:<14} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} ids \
             ({{per_sec}}, {{eta}})"
        ))
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::drain;
    use crate::error::StoreError;
    use crate::model::{EntityKind, GraphRecordId};
    use crate::scan::{ReadFailure, ScanOutcome};
    use rayon::ThreadPoolBuilder;
    use std::sync::Mutex;

    /// Emits every id; ids divisible by 7 are not in use, `panic_at` panics.
    struct Counting {
        highest: Option<GraphRecordId>,
        panic_at: Option<GraphRecordId>,
    }

    impl Scanner for Counting {
        type Entity = GraphRecordId;
        const KIND: EntityKind = EntityKind::Node;

        fn highest_id(&self) -> Result<Option<GraphRecordId>, StoreError> {
            Ok(self.highest)
        }

        fn scan(&self, id: GraphRecordId) -> ScanOutcome<GraphRecordId> {
            if Some(id) == self.panic_at {
                panic!("corrupt page at {id}");
            }
            if id % 7 == 0 {
                ScanOutcome::NotInUse
            } else {
                ScanOutcome::Accepted(id)
            }
        }

        fn log_failure(&self, _id: GraphRecordId, _failure: &ReadFailure, _log: &ErrorLog) {}

        fn flush(&self) {}
    }

    fn pool() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(3).build().unwrap()
    }

    fn settings() -> PhaseSettings {
        PhaseSettings {
            batch_size: 10,
            queue_capacity: 4,
            max_in_flight: 2,
            offer_timeout: Duration::from_millis(5),
            poll_timeout: Duration::from_millis(5),
            ..PhaseSettings::default()
        }
    }

    fn collect_phase(scanner: &Counting, log: &ErrorLog) -> (PhaseRun, Vec<GraphRecordId>) {
        let cancel = Cancellation::new();
        let seen = Mutex::new(Vec::new());
        let run = run_phase(scanner, &pool(), &settings(), &cancel, log, |queue, progress| {
            drain(queue, &cancel, EntityKind::Node, progress, log, |id| {
                seen.lock().unwrap().push(id);
                Ok(())
            })
        });
        (run, seen.into_inner().unwrap())
    }

    #[test]
    fn every_id_is_visited_once() {
        let scanner = Counting {
            highest: Some(99),
            panic_at: None,
        };
        let (run, mut seen) = collect_phase(&scanner, &ErrorLog::disabled());

        assert!(run.error.is_none());
        assert_eq!(run.stats.shards, 10);
        assert_eq!(run.stats.totals.scanned, 100);
        assert_eq!(run.stats.totals.not_found, 15);
        assert_eq!(run.stats.totals.succeeded, 85);
        assert_eq!(run.stats.loaded, 85);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 85);
    }

    #[test]
    fn empty_id_space_finishes_immediately() {
        let scanner = Counting {
            highest: None,
            panic_at: None,
        };
        let (run, seen) = collect_phase(&scanner, &ErrorLog::disabled());
        assert!(run.error.is_none());
        assert_eq!(run.stats.shards, 0);
        assert!(seen.is_empty());
    }

    #[test]
    fn worker_panic_fails_the_phase() {
        let scanner = Counting {
            highest: Some(199),
            panic_at: Some(42),
        };
        let dir = tempfile::TempDir::new().unwrap();
        let log = ErrorLog::create(dir.path()).unwrap();
        let (run, _) = collect_phase(&scanner, &log);

        let err = run.error.expect("phase should fail");
        assert!(matches!(err, CopyError::WorkerPanic { .. }));
        assert!(err.to_string().contains("corrupt page at 42"));
        assert_eq!(run.stats.outcome, PhaseOutcome::Failed);

        log.flush();
        let text = std::fs::read_to_string(crate::errorlog::error_log_path(dir.path())).unwrap();
        assert_eq!(text, "Worker: Nodes Batch 4 [40, 50) panicked: corrupt page at 42\n");
        assert_eq!(log.entries(), 1);
    }

    #[test]
    fn consumer_panic_is_logged() {
        let scanner = Counting {
            highest: Some(29),
            panic_at: None,
        };
        let dir = tempfile::TempDir::new().unwrap();
        let log = ErrorLog::create(dir.path()).unwrap();
        let cancel = Cancellation::new();
        let run = run_phase(&scanner, &pool(), &settings(), &cancel, &log, |_queue, _progress| {
            panic!("loader state lost")
        });

        let err = run.error.expect("phase should fail");
        assert!(matches!(err, CopyError::WorkerPanic { .. }));
        log.flush();
        let text = std::fs::read_to_string(crate::errorlog::error_log_path(dir.path())).unwrap();
        assert_eq!(
            text,
            "Consumer: node consumer scan worker panicked: loader state lost\n"
        );
    }

    #[test]
    fn consumer_error_is_reported() {
        let scanner = Counting {
            highest: Some(49),
            panic_at: None,
        };
        let cancel = Cancellation::new();
        let log = ErrorLog::disabled();
        let run = run_phase(&scanner, &pool(), &settings(), &cancel, &log, |queue, progress| {
            drain(queue, &cancel, EntityKind::Node, progress, &log, |id| {
                if id == 20 {
                    Err(CopyError::LoaderWrite {
                        kind: EntityKind::Node,
                        id,
                        source: StoreError::Rejected("full".into()),
                    })
                } else {
                    Ok(())
                }
            })
        });

        assert!(matches!(run.error, Some(CopyError::LoaderWrite { id: 20, .. })));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn panic_message_handles_both_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic payload");
    }
}
