use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Counters collected while compiling and shaping queries.
///
/// Profiling is enabled by setting the `PENUMBRA_PROFILE` environment
/// variable. When it is unset every hook is a cheap early return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileProfileSnapshot {
    /// Number of subquery push-downs performed by select expressions.
    pub push_down_count: u64,
    /// Total nanoseconds spent optimizing predicates.
    pub predicate_optimize_ns: u64,
    /// Number of predicates optimized.
    pub predicate_optimize_count: u64,
    /// Number of materializers built.
    pub materializer_build_count: u64,
    /// Number of include navigation steps compiled.
    pub include_step_count: u64,
    /// Number of operators flattened into an outer select.
    pub flatten_count: u64,
}

#[derive(Default)]
struct CompileProfileCounters {
    push_down_count: AtomicU64,
    predicate_optimize_ns: AtomicU64,
    predicate_optimize_count: AtomicU64,
    materializer_build_count: AtomicU64,
    include_step_count: AtomicU64,
    flatten_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<CompileProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("PENUMBRA_PROFILE").is_some())
}

fn counters() -> Option<&'static CompileProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(CompileProfileCounters::default))
}

/// Kinds of compiler events that are counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProfileCounter {
    /// A select moved its body into a derived table.
    PushDown,
    /// A materializer was created for an entity type.
    MaterializerBuild,
    /// One navigation of an include chain was compiled.
    IncludeStep,
    /// An operator was flattened into its outer select.
    Flatten,
}

pub(crate) fn profile_counter(kind: ProfileCounter) {
    let Some(counters) = counters() else {
        return;
    };
    let counter = match kind {
        ProfileCounter::PushDown => &counters.push_down_count,
        ProfileCounter::MaterializerBuild => &counters.materializer_build_count,
        ProfileCounter::IncludeStep => &counters.include_step_count,
        ProfileCounter::Flatten => &counters.flatten_count,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

/// Records the time spent in one predicate optimization started at `start`.
pub(crate) fn record_optimize_timer(start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    counters
        .predicate_optimize_ns
        .fetch_add(nanos, Ordering::Relaxed);
    counters
        .predicate_optimize_count
        .fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of the compiler counters.
///
/// Returns `None` when `PENUMBRA_PROFILE` is unset. With `reset` the counters
/// are zeroed as they are read.
///
/// ```no_run
/// use penumbra::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("push-downs: {}", snapshot.push_down_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<CompileProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(CompileProfileSnapshot {
        push_down_count: load(&counters.push_down_count),
        predicate_optimize_ns: load(&counters.predicate_optimize_ns),
        predicate_optimize_count: load(&counters.predicate_optimize_count),
        materializer_build_count: load(&counters.materializer_build_count),
        include_step_count: load(&counters.include_step_count),
        flatten_count: load(&counters.flatten_count),
    })
}
