use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// Default heuristic values. All of them can be changed at runtime.
const DEFAULT_BRUTE_FORCE_THRESHOLD: usize = 1000;
const DEFAULT_PARALLEL_THRESHOLD: usize = 300;
const DEFAULT_VORONOI_SEARCH_FACTOR: f64 = 2.5;
const DEFAULT_FACE_AREA_THRESHOLD: f64 = 0.0;

static BRUTE_FORCE_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_BRUTE_FORCE_THRESHOLD);
static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);
// f64 knobs are stored as raw bits.
static VORONOI_SEARCH_FACTOR: AtomicU64 = AtomicU64::new(DEFAULT_VORONOI_SEARCH_FACTOR.to_bits());
static FACE_AREA_THRESHOLD: AtomicU64 = AtomicU64::new(DEFAULT_FACE_AREA_THRESHOLD.to_bits());

pub fn get_brute_force_threshold() -> usize {
    BRUTE_FORCE_THRESHOLD.load(Ordering::Relaxed)
}

pub fn set_brute_force_threshold(val: usize) {
    BRUTE_FORCE_THRESHOLD.store(val, Ordering::Relaxed);
}

pub fn get_parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Relaxed)
}

pub fn set_parallel_threshold(val: usize) {
    PARALLEL_THRESHOLD.store(val, Ordering::Relaxed);
}

/// Initial Voronoi candidate radius in units of the mean interatomic spacing `(V/N)^(1/3)`.
pub fn get_voronoi_search_factor() -> f64 {
    f64::from_bits(VORONOI_SEARCH_FACTOR.load(Ordering::Relaxed))
}

/// Non-positive or non-finite values restore the default.
pub fn set_voronoi_search_factor(val: f64) {
    let val = if val.is_finite() && val > 0.0 {
        val
    } else {
        DEFAULT_VORONOI_SEARCH_FACTOR
    };
    VORONOI_SEARCH_FACTOR.store(val.to_bits(), Ordering::Relaxed);
}

/// Voronoi faces smaller than this fraction of the cell's mean face area
/// are not counted as neighbor contacts.
pub fn get_face_area_threshold() -> f64 {
    f64::from_bits(FACE_AREA_THRESHOLD.load(Ordering::Relaxed))
}

/// Accepts values in `[0, 1)`; anything else restores the default.
pub fn set_face_area_threshold(val: f64) {
    let val = if (0.0..1.0).contains(&val) {
        val
    } else {
        DEFAULT_FACE_AREA_THRESHOLD
    };
    FACE_AREA_THRESHOLD.store(val.to_bits(), Ordering::Relaxed);
}

pub fn get_num_threads() -> usize {
    rayon::current_num_threads()
}

/// Sizes the global rayon pool. Only the first call before any parallel work
/// takes effect; returns `false` if the pool was already built.
pub fn set_num_threads(n: usize) -> bool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n)
        .build_global()
        .is_ok()
}
