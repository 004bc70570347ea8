//! Host metric instruments. Created lazily from the global meter, so touch them after `init_metrics`.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};

pub struct HostMetrics {
    pub uploads_total: Counter<u64>,
    pub load_failures_total: Counter<u64>,
    pub trainings_total: Counter<u64>,
    pub training_latency_ms: Histogram<f64>,
    pub predicted_rows_total: Counter<u64>,
    pub prediction_latency_ms: Histogram<f64>,
    pub model_faults_total: Counter<u64>,
    pub retired_total: Counter<u64>,
}

static HOST_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("modelhost"));

pub static HOST_METRICS: Lazy<HostMetrics> = Lazy::new(|| {
    HostMetrics {
        uploads_total: HOST_METER.u64_counter("modelhost_uploads_total").with_description("Packages accepted and registered").build(),
        load_failures_total: HOST_METER.u64_counter("modelhost_load_failures_total").with_description("Package uploads rejected by the loader").build(),
        trainings_total: HOST_METER.u64_counter("modelhost_trainings_total").with_description("Training runs by outcome").build(),
        training_latency_ms: HOST_METER.f64_histogram("modelhost_training_latency_ms").with_description("setup+fit wall time (ms)").with_unit("ms").build(),
        predicted_rows_total: HOST_METER.u64_counter("modelhost_predicted_rows_total").with_description("Rows returned by predict calls").build(),
        prediction_latency_ms: HOST_METER.f64_histogram("modelhost_prediction_latency_ms").with_description("predict wall time (ms)").with_unit("ms").build(),
        model_faults_total: HOST_METER.u64_counter("modelhost_model_faults_total").with_description("Failures raised inside user model code").build(),
        retired_total: HOST_METER.u64_counter("modelhost_retired_total").with_description("Instances disposed after replace or delete").build(),
    }
});
