// Copyright 2026 gridtier Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{BoxedCounter, BoxedGauge, BoxedHistogram, GaugeVecOps, HistogramVecOps, RegistryOps};
use crate::metrics::CounterVecOps;

trait Boxer {
    fn boxed(self) -> Box<Self>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}
impl<T> Boxer for T {}

/// Metrics model shared by all tiers of one cache instance.
#[derive(Debug)]
pub struct Metrics {
    /* hot cache metrics */
    /// Hot cache insertions.
    pub hot_insert: BoxedCounter,
    /// Hot cache lookup hits.
    pub hot_hit: BoxedCounter,
    /// Hot cache lookup misses.
    pub hot_miss: BoxedCounter,
    /// Hot cache removals.
    pub hot_remove: BoxedCounter,
    /// Hot cache evictions.
    pub hot_evict: BoxedCounter,
    /// Hot cache resident entry count.
    pub hot_usage: BoxedGauge,

    /* residency metrics */
    /// Reads of cold-classified data that bypassed the hot cache.
    pub hot_data_miss: BoxedCounter,
    /// Bulk unit flushes, own and taken over.
    pub bulk_flush: BoxedCounter,
    /// Reads that ran into a foreign active bulk unit.
    pub bulk_conflict: BoxedCounter,
    /// Entries currently loaded on heap.
    pub resident_entries: BoxedGauge,

    /* storage metrics */
    /// Single adds against the blob store.
    pub storage_add: BoxedCounter,
    /// Gets against the blob store.
    pub storage_get: BoxedCounter,
    /// Replaces against the blob store.
    pub storage_replace: BoxedCounter,
    /// Removes against the blob store.
    pub storage_remove: BoxedCounter,
    /// Bulk executions against the blob store.
    pub storage_bulk: BoxedCounter,
    /// Failed blob store operations.
    pub storage_failure: BoxedCounter,

    /// Single add durations.
    pub storage_add_duration: BoxedHistogram,
    /// Get durations.
    pub storage_get_duration: BoxedHistogram,
    /// Replace durations.
    pub storage_replace_duration: BoxedHistogram,
    /// Remove durations.
    pub storage_remove_duration: BoxedHistogram,
    /// Bulk execution durations.
    pub storage_bulk_duration: BoxedHistogram,

    /// Bytes handed to the blob store.
    pub storage_write_bytes: BoxedCounter,
    /// Bytes received from the blob store.
    pub storage_read_bytes: BoxedCounter,

    /// Entry serialization durations.
    pub serialize_duration: BoxedHistogram,
    /// Entry deserialization durations.
    pub deserialize_duration: BoxedHistogram,

    /* off-heap metrics */
    /// Off-heap cache hits.
    pub offheap_hit: BoxedCounter,
    /// Off-heap cache misses.
    pub offheap_miss: BoxedCounter,
    /// Off-heap pool usage in bytes.
    pub offheap_used_bytes: BoxedGauge,
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new<R>(name: &'static str, registry: &R) -> Self
    where
        R: RegistryOps,
    {
        /* hot cache metrics */

        let gridtier_hot_cache_op_total = registry.register_counter_vec(
            "gridtier_hot_cache_op_total",
            "gridtier hot cache operations",
            &["name", "op"],
        );
        let gridtier_hot_cache_usage = registry.register_gauge_vec(
            "gridtier_hot_cache_usage",
            "gridtier hot cache resident entries",
            &["name"],
        );

        let hot_insert = gridtier_hot_cache_op_total.counter(&[name, "insert"]).boxed();
        let hot_hit = gridtier_hot_cache_op_total.counter(&[name, "hit"]).boxed();
        let hot_miss = gridtier_hot_cache_op_total.counter(&[name, "miss"]).boxed();
        let hot_remove = gridtier_hot_cache_op_total.counter(&[name, "remove"]).boxed();
        let hot_evict = gridtier_hot_cache_op_total.counter(&[name, "evict"]).boxed();

        let hot_usage = gridtier_hot_cache_usage.gauge(&[name]).boxed();

        /* residency metrics */

        let gridtier_residency_op_total = registry.register_counter_vec(
            "gridtier_residency_op_total",
            "gridtier entry residency operations",
            &["name", "op"],
        );
        let gridtier_residency_usage = registry.register_gauge_vec(
            "gridtier_residency_usage",
            "gridtier loaded entries",
            &["name"],
        );

        let hot_data_miss = gridtier_residency_op_total.counter(&[name, "hot_data_miss"]).boxed();
        let bulk_flush = gridtier_residency_op_total.counter(&[name, "bulk_flush"]).boxed();
        let bulk_conflict = gridtier_residency_op_total.counter(&[name, "bulk_conflict"]).boxed();

        let resident_entries = gridtier_residency_usage.gauge(&[name]).boxed();

        /* storage metrics */

        let gridtier_storage_op_total = registry.register_counter_vec(
            "gridtier_storage_op_total",
            "gridtier blob store operations",
            &["name", "op"],
        );
        let gridtier_storage_op_duration = registry.register_histogram_vec(
            "gridtier_storage_op_duration",
            "gridtier blob store op durations",
            &["name", "op"],
        );
        let gridtier_storage_io_bytes = registry.register_counter_vec(
            "gridtier_storage_io_bytes",
            "gridtier blob store io bytes",
            &["name", "op"],
        );
        let gridtier_entry_serde_duration = registry.register_histogram_vec(
            "gridtier_entry_serde_duration",
            "gridtier entry serde durations",
            &["name", "op"],
        );

        let storage_add = gridtier_storage_op_total.counter(&[name, "add"]).boxed();
        let storage_get = gridtier_storage_op_total.counter(&[name, "get"]).boxed();
        let storage_replace = gridtier_storage_op_total.counter(&[name, "replace"]).boxed();
        let storage_remove = gridtier_storage_op_total.counter(&[name, "remove"]).boxed();
        let storage_bulk = gridtier_storage_op_total.counter(&[name, "bulk"]).boxed();
        let storage_failure = gridtier_storage_op_total.counter(&[name, "failure"]).boxed();

        let storage_add_duration = gridtier_storage_op_duration.histogram(&[name, "add"]).boxed();
        let storage_get_duration = gridtier_storage_op_duration.histogram(&[name, "get"]).boxed();
        let storage_replace_duration = gridtier_storage_op_duration.histogram(&[name, "replace"]).boxed();
        let storage_remove_duration = gridtier_storage_op_duration.histogram(&[name, "remove"]).boxed();
        let storage_bulk_duration = gridtier_storage_op_duration.histogram(&[name, "bulk"]).boxed();

        let storage_write_bytes = gridtier_storage_io_bytes.counter(&[name, "write"]).boxed();
        let storage_read_bytes = gridtier_storage_io_bytes.counter(&[name, "read"]).boxed();

        let serialize_duration = gridtier_entry_serde_duration.histogram(&[name, "serialize"]).boxed();
        let deserialize_duration = gridtier_entry_serde_duration
            .histogram(&[name, "deserialize"])
            .boxed();

        /* off-heap metrics */

        let gridtier_offheap_op_total = registry.register_counter_vec(
            "gridtier_offheap_op_total",
            "gridtier off-heap cache operations",
            &["name", "op"],
        );
        let gridtier_offheap_usage = registry.register_gauge_vec(
            "gridtier_offheap_usage",
            "gridtier off-heap pool usage",
            &["name"],
        );

        let offheap_hit = gridtier_offheap_op_total.counter(&[name, "hit"]).boxed();
        let offheap_miss = gridtier_offheap_op_total.counter(&[name, "miss"]).boxed();

        let offheap_used_bytes = gridtier_offheap_usage.gauge(&[name]).boxed();

        Self {
            hot_insert,
            hot_hit,
            hot_miss,
            hot_remove,
            hot_evict,
            hot_usage,

            hot_data_miss,
            bulk_flush,
            bulk_conflict,
            resident_entries,

            storage_add,
            storage_get,
            storage_replace,
            storage_remove,
            storage_bulk,
            storage_failure,
            storage_add_duration,
            storage_get_duration,
            storage_replace_duration,
            storage_remove_duration,
            storage_bulk_duration,
            storage_write_bytes,
            storage_read_bytes,
            serialize_duration,
            deserialize_duration,

            offheap_hit,
            offheap_miss,
            offheap_used_bytes,
        }
    }

    /// Build noop metrics.
    ///
    /// Note: `noop` is only supposed to be called by other gridtier components.
    #[doc(hidden)]
    pub fn noop() -> Self {
        use super::registry::noop::NoopMetricsRegistry;

        Self::new("test", &NoopMetricsRegistry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::registry::noop::NoopMetricsRegistry;

    fn case(registry: &impl RegistryOps) {
        let _ = Metrics::new("test", registry);
    }

    #[test]
    fn test_metrics_noop() {
        case(&NoopMetricsRegistry);
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_metrics_prometheus() {
        use crate::metrics::registry::prometheus::PrometheusMetricsRegistry;

        case(&PrometheusMetricsRegistry::new(prometheus::Registry::new()));
    }
}
