//! Streaming configuration handling.

use smart_default::SmartDefault;
use strata_schemas::voxel::block::BlockState;

/// Tuning knobs for the chunk streamer and the asynchronous loader.
///
/// All queue limits and per-frame budgets treat `0` as "unlimited"; the
/// sentinel is preserved from the engine's original configuration format.
#[derive(Clone, PartialEq, Debug, SmartDefault)]
pub struct StreamConfig {
    /// Radius of the desired set around the observer, in chunks.
    #[default = 8]
    pub view_distance_chunks: i32,
    /// Hysteresis radius for eviction, clamped to at least the view distance.
    #[default = 10]
    pub unload_distance_chunks: i32,
    /// Maximum in-flight generation jobs (0 = unlimited).
    #[default = 64]
    pub gen_queue_limit: usize,
    /// Maximum in-flight mesh jobs (0 = unlimited); partitioned 75/25
    /// between first-time meshes and remeshes.
    #[default = 64]
    pub mesh_queue_limit: usize,
    /// Maximum pending loader chunks before requests are refused (0 = unlimited).
    #[default = 256]
    pub load_queue_limit: usize,
    /// Desired-set entries walked per `update` call (0 = unlimited).
    #[default = 512]
    pub update_budget_per_frame: usize,
    /// Generator/mesh results applied per `process_completions` call (0 = unlimited).
    #[default = 64]
    pub apply_budget_per_frame: usize,
    /// Loader payloads applied per `process_completions` call (0 = unlimited).
    #[default = 64]
    pub load_apply_budget_per_frame: usize,
    /// Total worker threads, partitioned between generation and meshing.
    /// With 0 threads jobs run inline on the main thread.
    #[default = 4]
    pub worker_threads: usize,
    /// Threads for the loader's region-read pool.
    #[default = 1]
    pub io_threads: usize,
    /// Threads for the loader's payload-assembly pool.
    #[default = 1]
    pub load_worker_threads: usize,
    /// Resident chunk cap; excess chunks outside the desired set are evicted
    /// least-recently-used first (0 = unlimited).
    #[default = 0]
    pub max_resident_chunks: usize,
    /// Loader region cache cap (0 = unlimited).
    #[default = 8]
    pub max_cached_regions: usize,
    /// Maximum concurrently outstanding region reads (0 = unlimited).
    #[default = 8]
    pub max_in_flight_regions: usize,
    /// Region prefetch radius around a requested region, in region units
    /// (0 = disabled).
    #[default = 1]
    pub prefetch_radius: i32,
    /// Compress region payloads with LZ4 when writing.
    #[default = false]
    pub enable_lz4: bool,
    /// Replacement state for block IDs a worker result references but the
    /// registry does not know.
    #[default(BlockState::AIR)]
    pub unknown_block_placeholder: BlockState,
}

/// Maps the `0 = unlimited` sentinel onto a usable bound.
#[inline]
pub(crate) fn effective_limit(value: usize) -> usize {
    if value == 0 {
        usize::MAX
    } else {
        value
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_means_unlimited() {
        assert_eq!(effective_limit(0), usize::MAX);
        assert_eq!(effective_limit(7), 7);
    }

    #[test]
    fn defaults_are_sane() {
        let config = StreamConfig::default();
        assert!(config.unload_distance_chunks >= config.view_distance_chunks);
        assert!(config.view_distance_chunks > 0);
    }
}
