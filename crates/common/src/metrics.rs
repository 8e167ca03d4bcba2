use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    plan_rewrites: CounterVec,
    plan_compile_failures: CounterVec,
    fetch_jobs: CounterVec,
    fetch_wait_seconds: HistogramVec,
    fetch_rows: CounterVec,
    fetch_errors: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// `kind` is one of `sharded`, `global`, `passthrough`.
    pub fn record_rewrite(&self, table: &str, kind: &str) {
        self.inner
            .plan_rewrites
            .with_label_values(&[table, kind])
            .inc();
    }

    pub fn inc_compile_failures(&self, reason: &str) {
        self.inner
            .plan_compile_failures
            .with_label_values(&[reason])
            .inc();
    }

    /// `mode` is `transaction` or `autocommit`.
    pub fn record_fetch_submitted(&self, target: &str, mode: &str) {
        self.inner
            .fetch_jobs
            .with_label_values(&[target, mode])
            .inc();
    }

    pub fn observe_fetch_wait(&self, target: &str, secs: f64) {
        self.inner
            .fetch_wait_seconds
            .with_label_values(&[target])
            .observe(secs.max(0.0));
    }

    pub fn add_fetch_rows(&self, target: &str, rows: u64) {
        self.inner
            .fetch_rows
            .with_label_values(&[target])
            .inc_by(rows as f64);
    }

    /// `kind` is one of `timeout`, `failure`, `cancelled`.
    pub fn inc_fetch_errors(&self, target: &str, kind: &str) {
        self.inner
            .fetch_errors
            .with_label_values(&[target, kind])
            .inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let plan_rewrites = counter_vec(
            &registry,
            "shq_plan_rewrites_total",
            "Logical table scans rewritten into physical scans",
            &["table", "kind"],
        );
        let plan_compile_failures = counter_vec(
            &registry,
            "shq_plan_compile_failures_total",
            "Compilations that produced no plan",
            &["reason"],
        );
        let fetch_jobs = counter_vec(
            &registry,
            "shq_fetch_jobs_total",
            "Fetch jobs submitted per backend target",
            &["target", "mode"],
        );
        let fetch_wait_seconds = histogram_vec(
            &registry,
            "shq_fetch_wait_seconds",
            "Time the consumer waited for a fetch job on first pull",
            &["target"],
        );
        let fetch_rows = counter_vec(
            &registry,
            "shq_fetch_rows_total",
            "Rows pulled from backend targets",
            &["target"],
        );
        let fetch_errors = counter_vec(
            &registry,
            "shq_fetch_errors_total",
            "Fetch resolution errors per backend target",
            &["target", "kind"],
        );

        Self {
            registry,
            plan_rewrites,
            plan_compile_failures,
            fetch_jobs,
            fetch_wait_seconds,
            fetch_rows,
            fetch_errors,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
