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

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

use crate::metrics::{CounterOps, CounterVecOps, GaugeOps, GaugeVecOps, HistogramOps, HistogramVecOps, RegistryOps};

#[derive(Debug, Clone)]
enum MetricVec {
    Counter(IntCounterVec),
    Gauge(IntGaugeVec),
    Histogram(HistogramVec),
}

impl CounterOps for IntCounter {
    fn increase(&self, val: u64) {
        self.inc_by(val);
    }
}

impl CounterVecOps for IntCounterVec {
    fn counter(&self, labels: &[&'static str]) -> impl CounterOps {
        self.with_label_values(labels)
    }
}

impl GaugeOps for IntGauge {
    fn increase(&self, val: u64) {
        self.add(val as _);
    }

    fn decrease(&self, val: u64) {
        self.sub(val as _);
    }

    fn absolute(&self, val: u64) {
        self.set(val as _);
    }
}

impl GaugeVecOps for IntGaugeVec {
    fn gauge(&self, labels: &[&'static str]) -> impl GaugeOps {
        self.with_label_values(labels)
    }
}

impl HistogramOps for Histogram {
    fn record(&self, val: f64) {
        self.observe(val);
    }
}

impl HistogramVecOps for HistogramVec {
    fn histogram(&self, labels: &[&'static str]) -> impl HistogramOps {
        self.with_label_values(labels)
    }
}

/// Prometheus metric registry with lib `prometheus`.
///
/// The [`PrometheusMetricsRegistry`] can be cloned and shared by multiple cache instances.
/// Re-registering a metric vector under the same name returns the existing one.
#[derive(Debug, Clone)]
pub struct PrometheusMetricsRegistry {
    registry: Arc<Registry>,
    metrics: Arc<Mutex<HashMap<&'static str, MetricVec>>>,
}

impl PrometheusMetricsRegistry {
    /// Create a Prometheus metrics registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl RegistryOps for PrometheusMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: &'static str,
        desc: &'static str,
        label_names: &'static [&'static str],
    ) -> impl CounterVecOps {
        let mut metrics = self.metrics.lock();
        let vec = metrics.entry(name).or_insert_with(|| {
            MetricVec::Counter(
                register_int_counter_vec_with_registry! {name, desc, label_names, self.registry}.unwrap(),
            )
        });
        match vec {
            MetricVec::Counter(v) => v.clone(),
            _ => unreachable!(),
        }
    }

    fn register_gauge_vec(
        &self,
        name: &'static str,
        desc: &'static str,
        label_names: &'static [&'static str],
    ) -> impl GaugeVecOps {
        let mut metrics = self.metrics.lock();
        let vec = metrics.entry(name).or_insert_with(|| {
            MetricVec::Gauge(register_int_gauge_vec_with_registry! {name, desc, label_names, self.registry}.unwrap())
        });
        match vec {
            MetricVec::Gauge(v) => v.clone(),
            _ => unreachable!(),
        }
    }

    fn register_histogram_vec(
        &self,
        name: &'static str,
        desc: &'static str,
        label_names: &'static [&'static str],
    ) -> impl HistogramVecOps {
        let mut metrics = self.metrics.lock();
        let vec = metrics.entry(name).or_insert_with(|| {
            MetricVec::Histogram(
                register_histogram_vec_with_registry! {name, desc, label_names, self.registry}.unwrap(),
            )
        });
        match vec {
            MetricVec::Histogram(v) => v.clone(),
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(registry: &PrometheusMetricsRegistry) {
        let cv = registry.register_counter_vec("test_counter_1", "test counter 1", &["label1", "label2"]);
        let c = cv.counter(&["l1", "l2"]);
        c.increase(42);

        let gv = registry.register_gauge_vec("test_gauge_1", "test gauge 1", &["label1", "label2"]);
        let g = gv.gauge(&["l1", "l2"]);
        g.increase(514);
        g.decrease(114);
        g.absolute(114514);

        let hv = registry.register_histogram_vec("test_histogram_1", "test histogram 1", &["label1", "label2"]);
        let h = hv.histogram(&["l1", "l2"]);
        h.record(114.514);
    }

    #[test]
    fn test_prometheus_metrics_registry() {
        let registry = PrometheusMetricsRegistry::new(Registry::new());
        case(&registry);
    }

    #[test]
    fn test_shared_prometheus_metrics_registry() {
        let r1 = PrometheusMetricsRegistry::new(Registry::new());
        let r2 = r1.clone();
        case(&r1);
        case(&r2);
    }
}
