use crate::model::EntityKind;
use serde::Serialize;
use std::fmt;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters of one shard scan, owned by the worker that ran it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub scanned: u64,
    pub not_found: u64,
    pub removed: u64,
    pub succeeded: u64,
    pub read_failures: u64,
    pub elapsed_ms: u64,
}

impl ShardStats {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

impl AddAssign<&ShardStats> for ShardStats {
    fn add_assign(&mut self, other: &ShardStats) {
        self.scanned += other.scanned;
        self.not_found += other.not_found;
        self.removed += other.removed;
        self.succeeded += other.succeeded;
        self.read_failures += other.read_failures;
        self.elapsed_ms += other.elapsed_ms;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    Running,
    Ok,
    Failed,
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseOutcome::Running => "RUNNING",
            PhaseOutcome::Ok => "OK",
            PhaseOutcome::Failed => "FAIL",
        })
    }
}

/// Running totals of one copy phase.
///
/// Shard results are folded in at checkpoints and discarded, so memory stays
/// flat no matter how many shards a phase has. `elapsed_ms` of the totals is
/// the wall-clock span of the phase, not the sum over shards.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseStats {
    pub kind: EntityKind,
    pub shards: u64,
    pub totals: ShardStats,
    /// Records the bulk loader accepted.
    pub loaded: u64,
    pub outcome: PhaseOutcome,
    #[serde(skip)]
    started: Instant,
}

impl PhaseStats {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            shards: 0,
            totals: ShardStats::default(),
            loaded: 0,
            outcome: PhaseOutcome::Running,
            started: Instant::now(),
        }
    }

    /// Folds a group of completed shards into the totals.
    pub fn merge<'a>(&mut self, batch: impl IntoIterator<Item = &'a ShardStats>) {
        for shard in batch {
            let elapsed = self.totals.elapsed_ms;
            self.totals += shard;
            self.totals.elapsed_ms = elapsed;
            self.shards += 1;
        }
    }

    pub fn finish(&mut self, success: bool, loaded: u64) {
        self.totals.elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.loaded = loaded;
        self.outcome = if success {
            PhaseOutcome::Ok
        } else {
            PhaseOutcome::Failed
        };
    }

    /// Summary line for the phase totals.
    pub fn summary(&self) -> String {
        summary_line(
            &format!("{} Total", self.kind.plural()),
            self.outcome,
            &self.totals,
        )
    }
}

/// Records per second, guarding against a zero-second span.
pub fn rate(count: u64, elapsed: Duration) -> u64 {
    count / elapsed.as_secs().max(1)
}

pub fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        0
    } else {
        part.saturating_mul(100) / whole
    }
}

/// `<name>: OK copying of N records took S seconds (R rec/s).`
/// followed by the `Unused Records` and `Removed Records` counts.
pub fn summary_line(name: &str, outcome: PhaseOutcome, stats: &ShardStats) -> String {
    let secs = stats.elapsed().as_secs();
    format!(
        "{name}: {outcome} copying of {} records took {secs} seconds ({} rec/s). \
         Unused Records {} ({}%) Removed Records {} ({}%)",
        stats.scanned,
        rate(stats.scanned, stats.elapsed()),
        stats.not_found,
        percent(stats.not_found, stats.scanned),
        stats.removed,
        percent(stats.removed, stats.scanned),
    )
}

/// Live counters shared by the workers and the consumer of one phase.
#[derive(Debug, Default)]
pub struct PhaseProgress {
    scanned: AtomicU64,
    emitted: AtomicU64,
    loaded: AtomicU64,
}

impl PhaseProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scanned(&self, count: u64) {
        self.scanned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_loaded(&self) {
        self.loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn loaded(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }
}
