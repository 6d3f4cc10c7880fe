//! Task scheduler: a bounded worker pool over (unit, sample) work items.
//!
//! Dispatch model:
//! - Per-sample units run first. The caller's thread feeds a bounded queue
//!   (`workers * QUEUE_DEPTH_PER_WORKER` slots) and drains the result channel
//!   into the sink as results arrive, so memory stays bounded on large
//!   datasets.
//! - Dataset-level units run afterwards, through the same pool, with a
//!   snapshot of the distributions folded so far.
//! - Heavy units see only the subset chosen by the sampling policy.
//!
//! Failure handling:
//! - A unit error or panic becomes an `Error` result for that (unit, sample)
//!   pair. The pool keeps going.
//! - On cancellation no new work is dispatched. In-flight work gets the grace
//!   period to finish; whatever is still running after that is abandoned
//!   (its worker threads are detached, not joined) and counted.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::aggregate::Aggregator;
use super::result::{ResultValue, UnitResult};
use crate::cache::MetadataCache;
use crate::models::{Sample, UnitCost, UnitScope};
use crate::units::{DistributionSnapshot, Unit, UnitContext, UnitInput};

const QUEUE_DEPTH_PER_WORKER: usize = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ═══════════════════════════════════════════
// Sampling
// ═══════════════════════════════════════════

/// How a heavy unit picks its bounded subset of the scan order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// The first `limit` samples in scan order.
    #[default]
    First,
    /// A fixed-seed random subset, returned in scan order.
    Seeded { seed: u64 },
}

impl SamplingPolicy {
    /// Ascending indices into a scan of `total` samples. Without a limit, or
    /// with a limit at least `total`, every index is selected.
    pub fn select(&self, total: usize, limit: Option<usize>) -> Vec<usize> {
        let Some(limit) = limit.filter(|&k| k < total) else {
            return (0..total).collect();
        };
        match self {
            Self::First => (0..limit).collect(),
            Self::Seeded { seed } => {
                let mut rng = StdRng::seed_from_u64(*seed);
                let mut picked = rand::seq::index::sample(&mut rng, total, limit).into_vec();
                picked.sort_unstable();
                picked
            }
        }
    }
}

// ═══════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════

/// Shared cancellation signal with an optional deadline. Clones observe the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that reports cancelled once `after` has elapsed.
    pub fn with_deadline(after: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + after),
        }
    }

    /// Same flag, plus a deadline `after` from now.
    pub fn limited_to(&self, after: Duration) -> Self {
        Self {
            flag: self.flag.clone(),
            deadline: Some(Instant::now() + after),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

// ═══════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════

/// Where the scheduler streams results.
pub trait ResultSink {
    fn accept(&mut self, result: UnitResult);

    /// Distributions handed to dataset-level units.
    fn snapshot(&self) -> DistributionSnapshot {
        DistributionSnapshot::new()
    }
}

impl ResultSink for Aggregator {
    fn accept(&mut self, result: UnitResult) {
        self.fold(result);
    }

    fn snapshot(&self) -> DistributionSnapshot {
        Aggregator::snapshot(self)
    }
}

impl ResultSink for Vec<UnitResult> {
    fn accept(&mut self, result: UnitResult) {
        self.push(result);
    }
}

// ═══════════════════════════════════════════
// Config & stats
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub sample_limit: Option<usize>,
    pub sampling: SamplingPolicy,
    pub grace_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: crate::config::default_worker_count(),
            sample_limit: None,
            sampling: SamplingPolicy::default(),
            grace_period: Duration::from_millis(crate::config::DEFAULT_GRACE_PERIOD_MS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub workers: usize,
    /// (unit, sample) pairs plus dataset-level runs planned.
    pub planned: u64,
    /// Runs that produced a result (including error results).
    pub completed: u64,
    /// Completed runs whose result was an error.
    pub failed: u64,
    /// Failed runs that panicked.
    pub panicked: u64,
    /// Planned runs never started because of cancellation.
    pub skipped: u64,
    /// Runs still in flight when the grace period ran out.
    pub abandoned: u64,
    pub cancelled: bool,
    /// Most runs observed executing at the same instant.
    pub peak_concurrency: usize,
}

impl ExecutionStats {
    pub fn is_partial(&self) -> bool {
        self.completed < self.planned
    }
}

// ═══════════════════════════════════════════
// Work items
// ═══════════════════════════════════════════

enum Task {
    Sample { unit: usize, sample: usize },
    Dataset { unit: usize, samples: Arc<Vec<Sample>> },
}

enum Outcome {
    Finished { result: UnitResult, panicked: bool },
    Skipped,
}

/// Everything a worker needs, shared by all workers of a phase.
#[derive(Clone)]
struct WorkerContext {
    units: Arc<Vec<Arc<dyn Unit>>>,
    samples: Arc<Vec<Sample>>,
    cache: Arc<MetadataCache>,
    upstream: Arc<DistributionSnapshot>,
    cancel: CancelToken,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl WorkerContext {
    fn execute(&self, task: &Task) -> Outcome {
        let (unit, sample_id, input) = match task {
            Task::Sample { unit, sample } => {
                let sample = &self.samples[*sample];
                (&self.units[*unit], Some(sample.id.clone()), UnitInput::Sample(sample))
            }
            Task::Dataset { unit, samples } => (
                &self.units[*unit],
                None,
                UnitInput::Dataset {
                    samples: samples.as_slice(),
                    upstream: self.upstream.as_ref(),
                },
            ),
        };

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let ctx = UnitContext::new(unit.descriptor(), &self.cache);
        let run = catch_unwind(AssertUnwindSafe(|| unit.run(input, &ctx)));
        self.active.fetch_sub(1, Ordering::SeqCst);

        let (value, panicked) = match run {
            Ok(Ok(value)) => (value, false),
            Ok(Err(e)) => {
                tracing::debug!(unit = unit.name(), sample = ?sample_id, error = %e, "Unit failed");
                (ResultValue::Error(e.to_string()), false)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(unit = unit.name(), sample = ?sample_id, panic = %message, "Unit panicked");
                (ResultValue::Error(format!("unit panicked: {message}")), true)
            }
        };

        Outcome::Finished {
            result: UnitResult {
                unit: unit.name().to_string(),
                sample_id,
                value,
            },
            panicked,
        }
    }
}

fn worker_loop(tasks: &Mutex<Receiver<Task>>, out: &Sender<Outcome>, ctx: &WorkerContext) {
    loop {
        let next = {
            let rx = match tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            rx.recv()
        };
        let Ok(task) = next else {
            break;
        };
        let outcome = if ctx.cancel.is_cancelled() {
            Outcome::Skipped
        } else {
            ctx.execute(&task)
        };
        if out.send(outcome).is_err() {
            break;
        }
    }
}

// ═══════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════

pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every unit against its inputs, streaming results into `sink`.
    ///
    /// Each (unit, sample) pair runs at most once, and at most
    /// `config.workers` runs execute at any instant.
    pub fn execute(
        &self,
        units: &[Arc<dyn Unit>],
        samples: Arc<Vec<Sample>>,
        cache: Arc<MetadataCache>,
        cancel: &CancelToken,
        sink: &mut dyn ResultSink,
    ) -> ExecutionStats {
        let workers = self.config.workers.max(1);
        let mut stats = ExecutionStats {
            workers,
            ..ExecutionStats::default()
        };

        let (per_sample, dataset): (Vec<usize>, Vec<usize>) = (0..units.len())
            .partition(|&i| units[i].descriptor().scope == UnitScope::PerSample);

        let selection = |unit: &Arc<dyn Unit>| match unit.descriptor().cost {
            UnitCost::Heavy => self
                .config
                .sampling
                .select(samples.len(), self.config.sample_limit),
            UnitCost::Light => (0..samples.len()).collect(),
        };

        // Sample-major order so the units of one sample hit the cache together.
        let mut allowed = vec![vec![false; samples.len()]; units.len()];
        for &u in &per_sample {
            for idx in selection(&units[u]) {
                allowed[u][idx] = true;
            }
        }
        let allowed = &allowed;
        let sample_tasks: Vec<Task> = (0..samples.len())
            .flat_map(|s| {
                per_sample
                    .iter()
                    .filter(move |&&u| allowed[u][s])
                    .map(move |&u| Task::Sample { unit: u, sample: s })
            })
            .collect();

        let mut ctx = WorkerContext {
            units: Arc::new(units.to_vec()),
            samples: samples.clone(),
            cache,
            upstream: Arc::new(DistributionSnapshot::new()),
            cancel: cancel.clone(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };

        stats.planned = (sample_tasks.len() + dataset.len()) as u64;
        tracing::info!(
            units = units.len(),
            samples = samples.len(),
            tasks = sample_tasks.len(),
            workers,
            "Executing per-sample units"
        );
        let abandoned = self.run_phase("sample", sample_tasks, &ctx, sink, &mut stats);

        if !dataset.is_empty() {
            if abandoned || cancel.is_cancelled() {
                stats.skipped += dataset.len() as u64;
            } else {
                ctx.upstream = Arc::new(sink.snapshot());
                let dataset_tasks = dataset
                    .iter()
                    .map(|&u| {
                        let subset = match units[u].descriptor().cost {
                            UnitCost::Light => samples.clone(),
                            UnitCost::Heavy => Arc::new(
                                selection(&units[u])
                                    .into_iter()
                                    .map(|i| samples[i].clone())
                                    .collect(),
                            ),
                        };
                        Task::Dataset { unit: u, samples: subset }
                    })
                    .collect();
                tracing::info!(units = dataset.len(), "Executing dataset-level units");
                self.run_phase("dataset", dataset_tasks, &ctx, sink, &mut stats);
            }
        }

        stats.cancelled = cancel.is_cancelled();
        stats.peak_concurrency = ctx.peak.load(Ordering::SeqCst);
        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            abandoned = stats.abandoned,
            "Execution finished"
        );
        stats
    }

    /// Run one phase to completion (or until the grace period after
    /// cancellation runs out). Returns true if in-flight work was abandoned.
    fn run_phase(
        &self,
        phase: &str,
        tasks: Vec<Task>,
        ctx: &WorkerContext,
        sink: &mut dyn ResultSink,
        stats: &mut ExecutionStats,
    ) -> bool {
        if tasks.is_empty() {
            return false;
        }
        let workers = self.config.workers.max(1).min(tasks.len());
        let (task_tx, task_rx) = mpsc::sync_channel::<Task>(workers * QUEUE_DEPTH_PER_WORKER);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (out_tx, out_rx) = mpsc::channel::<Outcome>();

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = task_rx.clone();
            let tx = out_tx.clone();
            let worker_ctx = ctx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("cvaudit-{phase}-{i}"))
                .spawn(move || worker_loop(&rx, &tx, &worker_ctx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(worker = i, error = %e, "Failed to spawn worker"),
            }
        }
        drop(out_tx);

        if handles.is_empty() {
            tracing::warn!(phase, "No worker threads available, running inline");
            for task in tasks {
                if ctx.cancel.is_cancelled() {
                    stats.skipped += 1;
                    continue;
                }
                Self::record(ctx.execute(&task), sink, stats);
            }
            return false;
        }

        let mut backlog: VecDeque<Task> = tasks.into();
        let mut queue = Some(task_tx);
        let mut dispatched: u64 = 0;
        let mut received: u64 = 0;
        let mut grace_deadline: Option<Instant> = None;
        let mut abandoned = false;

        loop {
            if ctx.cancel.is_cancelled() && !backlog.is_empty() {
                stats.skipped += backlog.len() as u64;
                backlog.clear();
            }
            if let Some(tx) = &queue {
                while let Some(task) = backlog.pop_front() {
                    match tx.try_send(task) {
                        Ok(()) => dispatched += 1,
                        Err(TrySendError::Full(task)) => {
                            backlog.push_front(task);
                            break;
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            stats.skipped += 1 + backlog.len() as u64;
                            backlog.clear();
                        }
                    }
                }
                if backlog.is_empty() {
                    // Closing the queue lets idle workers exit.
                    queue = None;
                }
            }

            match out_rx.recv_timeout(POLL_INTERVAL) {
                Ok(outcome) => {
                    received += 1;
                    Self::record(outcome, sink, stats);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if ctx.cancel.is_cancelled() {
                let deadline =
                    *grace_deadline.get_or_insert_with(|| Instant::now() + self.config.grace_period);
                if Instant::now() >= deadline {
                    // Anything the workers already took or still hold in the
                    // queue will not be folded.
                    while let Ok(outcome) = out_rx.try_recv() {
                        received += 1;
                        Self::record(outcome, sink, stats);
                    }
                    stats.abandoned += dispatched.saturating_sub(received);
                    abandoned = dispatched > received;
                    break;
                }
            }
        }

        if abandoned {
            tracing::warn!(
                phase,
                abandoned = dispatched - received,
                "Grace period expired, abandoning in-flight work"
            );
            drop(handles);
        } else {
            for handle in handles {
                if handle.join().is_err() {
                    tracing::warn!(phase, "Worker thread exited abnormally");
                }
            }
        }
        abandoned
    }

    fn record(outcome: Outcome, sink: &mut dyn ResultSink, stats: &mut ExecutionStats) {
        match outcome {
            Outcome::Skipped => stats.skipped += 1,
            Outcome::Finished { result, panicked } => {
                stats.completed += 1;
                if result.value.is_error() {
                    stats.failed += 1;
                }
                if panicked {
                    stats.panicked += 1;
                }
                sink.accept(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregate::Distribution;
    use crate::models::{AnnotationState, ResultKind, Split, UnitKind};
    use crate::units::{UnitDescriptor, UnitError};
    use std::collections::{BTreeSet, HashMap};
    use std::path::PathBuf;

    fn samples(n: usize) -> Arc<Vec<Sample>> {
        Arc::new(
            (0..n)
                .map(|i| Sample {
                    id: format!("img_{i:02}.png"),
                    image_path: PathBuf::from(format!("img_{i:02}.png")),
                    split: Split::Train,
                    annotation: AnnotationState::Missing,
                    size_bytes: 0,
                    modified: None,
                })
                .collect(),
        )
    }

    type Body = dyn Fn(UnitInput<'_>) -> Result<ResultValue, UnitError> + Send + Sync;

    struct FnUnit {
        descriptor: UnitDescriptor,
        body: Box<Body>,
    }

    fn unit(
        descriptor: UnitDescriptor,
        body: impl Fn(UnitInput<'_>) -> Result<ResultValue, UnitError> + Send + Sync + 'static,
    ) -> Arc<dyn Unit> {
        Arc::new(FnUnit {
            descriptor,
            body: Box::new(body),
        })
    }

    impl Unit for FnUnit {
        fn descriptor(&self) -> &UnitDescriptor {
            &self.descriptor
        }

        fn run(&self, input: UnitInput<'_>, _: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
            (self.body)(input)
        }
    }

    fn counter(name: &str) -> Arc<dyn Unit> {
        unit(
            UnitDescriptor::new(name, UnitKind::Feature, ResultKind::Scalar),
            |_| Ok(ResultValue::Scalar(1.0)),
        )
    }

    fn scheduler(workers: usize, sample_limit: Option<usize>) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            workers,
            sample_limit,
            sampling: SamplingPolicy::First,
            grace_period: Duration::from_millis(50),
        })
    }

    fn run(
        sched: &Scheduler,
        units: &[Arc<dyn Unit>],
        samples: Arc<Vec<Sample>>,
        cancel: &CancelToken,
    ) -> (Vec<UnitResult>, ExecutionStats) {
        let mut out = Vec::new();
        let stats = sched.execute(units, samples, Arc::new(MetadataCache::new()), cancel, &mut out);
        (out, stats)
    }

    #[test]
    fn first_policy_takes_prefix() {
        assert_eq!(SamplingPolicy::First.select(10, Some(3)), vec![0, 1, 2]);
        assert_eq!(SamplingPolicy::First.select(3, Some(10)), vec![0, 1, 2]);
        assert_eq!(SamplingPolicy::First.select(4, None), vec![0, 1, 2, 3]);
    }

    #[test]
    fn seeded_policy_is_deterministic_and_sorted() {
        let policy = SamplingPolicy::Seeded { seed: 42 };
        let a = policy.select(100, Some(7));
        let b = policy.select(100, Some(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), 7);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert!(a.iter().all(|&i| i < 100));
    }

    #[test]
    fn sampling_policy_serde() {
        let p: SamplingPolicy = serde_json::from_str(r#"{"policy": "seeded", "seed": 9}"#).unwrap();
        assert_eq!(p, SamplingPolicy::Seeded { seed: 9 });
        let p: SamplingPolicy = serde_json::from_str(r#"{"policy": "first"}"#).unwrap();
        assert_eq!(p, SamplingPolicy::First);
    }

    #[test]
    fn cancel_token_flag_and_deadline() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());

        let expired = CancelToken::with_deadline(Duration::ZERO);
        assert!(expired.is_cancelled());

        let parent = CancelToken::new();
        let limited = parent.limited_to(Duration::from_secs(60));
        assert!(!limited.is_cancelled());
        parent.cancel();
        assert!(limited.is_cancelled());
        assert!(CancelToken::new().limited_to(Duration::ZERO).is_cancelled());
    }

    #[test]
    fn every_pair_runs_exactly_once() {
        let units = vec![counter("a"), counter("b"), counter("c")];
        let (results, stats) = run(&scheduler(4, None), &units, samples(25), &CancelToken::new());

        let mut seen: HashMap<(String, String), usize> = HashMap::new();
        for r in &results {
            *seen.entry((r.unit.clone(), r.sample_id.clone().unwrap())).or_default() += 1;
        }
        assert_eq!(seen.len(), 75);
        assert!(seen.values().all(|&n| n == 1));
        assert_eq!(stats.planned, 75);
        assert_eq!(stats.completed, 75);
        assert!(!stats.is_partial());
    }

    #[test]
    fn heavy_unit_sees_only_the_limited_subset() {
        let heavy = unit(
            UnitDescriptor::new("dup", UnitKind::Feature, ResultKind::Histogram).heavy(),
            |input| Ok(ResultValue::single_bucket(input.sample()?.id.clone(), 1)),
        );
        let units = vec![heavy, counter("light")];
        let (results, _) = run(&scheduler(3, Some(2)), &units, samples(10), &CancelToken::new());

        let heavy_ids: BTreeSet<String> = results
            .iter()
            .filter(|r| r.unit == "dup")
            .filter_map(|r| r.sample_id.clone())
            .collect();
        assert_eq!(
            heavy_ids,
            ["img_00.png", "img_01.png"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(results.iter().filter(|r| r.unit == "light").count(), 10);
    }

    #[test]
    fn failures_and_panics_are_isolated() {
        let failing = unit(
            UnitDescriptor::new("failing", UnitKind::Check, ResultKind::Scalar),
            |_| Err(UnitError::Failed("always".into())),
        );
        let panicking = unit(
            UnitDescriptor::new("panicking", UnitKind::Check, ResultKind::Scalar),
            |input| {
                if input.sample()?.id == "img_02.png" {
                    panic!("bad sample");
                }
                Ok(ResultValue::Scalar(0.0))
            },
        );
        let units = vec![failing, panicking, counter("ok")];
        let (results, stats) = run(&scheduler(2, None), &units, samples(5), &CancelToken::new());

        assert_eq!(results.len(), 15);
        assert_eq!(stats.failed, 6);
        assert_eq!(stats.panicked, 1);
        assert!(results
            .iter()
            .filter(|r| r.unit == "ok")
            .all(|r| r.value == ResultValue::Scalar(1.0)));
        let panicked = results
            .iter()
            .find(|r| r.unit == "panicking" && r.value.is_error())
            .unwrap();
        assert_eq!(panicked.sample_id.as_deref(), Some("img_02.png"));
        assert!(matches!(&panicked.value, ResultValue::Error(m) if m.contains("bad sample")));
    }

    #[test]
    fn concurrency_never_exceeds_worker_count() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let slow = unit(
            UnitDescriptor::new("slow", UnitKind::Feature, ResultKind::Scalar),
            move |_| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(ResultValue::Scalar(0.0))
            },
        );
        let (results, stats) = run(&scheduler(3, None), &[slow], samples(30), &CancelToken::new());

        assert_eq!(results.len(), 30);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(stats.peak_concurrency <= 3);
        assert!(stats.peak_concurrency >= 1);
    }

    #[test]
    fn dataset_units_run_after_per_sample_units() {
        let labels = unit(
            UnitDescriptor::new("labels", UnitKind::Feature, ResultKind::Histogram),
            |_| Ok(ResultValue::single_bucket("cat", 1)),
        );
        let summary = unit(
            UnitDescriptor::new("summary", UnitKind::Feature, ResultKind::Scalar).dataset_level(),
            |input| match input {
                UnitInput::Dataset { samples, upstream } => {
                    let Some(Distribution::Histogram { buckets }) = upstream.get("labels") else {
                        return Err(UnitError::Failed("labels not folded yet".into()));
                    };
                    Ok(ResultValue::Scalar((buckets["cat"] + samples.len() as u64) as f64))
                }
                UnitInput::Sample(_) => Err(UnitError::Failed("wrong scope".into())),
            },
        );

        let mut agg = Aggregator::new(10);
        agg.declare("labels", ResultKind::Histogram);
        agg.declare("summary", ResultKind::Scalar);
        let stats = scheduler(4, None).execute(
            &[summary, labels],
            samples(6),
            Arc::new(MetadataCache::new()),
            &CancelToken::new(),
            &mut agg,
        );

        assert_eq!(stats.planned, 7);
        let snapshot = agg.snapshot();
        let Distribution::Scalar { sum, count, .. } = &snapshot["summary"] else {
            panic!("expected scalar");
        };
        assert_eq!(*count, 1);
        assert_eq!(*sum, 12.0);
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let (results, stats) = run(&scheduler(2, None), &[counter("a")], samples(10), &token);
        assert!(results.is_empty());
        assert!(stats.cancelled);
        assert!(stats.is_partial());
        assert_eq!(stats.skipped, 10);
    }

    #[test]
    fn grace_period_bounds_wait_for_hung_units() {
        let hung = unit(
            UnitDescriptor::new("hung", UnitKind::Feature, ResultKind::Scalar),
            |_| {
                std::thread::sleep(Duration::from_secs(3));
                Ok(ResultValue::Scalar(0.0))
            },
        );
        let token = CancelToken::with_deadline(Duration::from_millis(30));
        let started = Instant::now();
        let (results, stats) = run(&scheduler(2, None), &[hung], samples(8), &token);

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(results.is_empty());
        assert!(stats.abandoned >= 1);
        assert!(stats.is_partial());
    }
}
