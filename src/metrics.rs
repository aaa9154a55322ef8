//! Prometheus metrics for the conductor.

use prometheus::{Counter, CounterVec, GaugeVec, Opts, Registry};

const LABEL_WORKER_NAME: &str = "worker_name";

/// Metrics collaborator passed to the dispatcher, task observers and sweeper.
/// Owns its registry, so construction doubles as registration.
pub struct Metrics {
    registry: Registry,
    /// Payloads published to worker inboxes.
    pub requests_published: Counter,
    /// Tasks currently observed, per worker.
    pub requests_running: GaugeVec,
    /// Tasks completed and ingested, per worker.
    pub requests_done: CounterVec,
    /// Tasks terminated with an error, per worker.
    pub requests_errors: CounterVec,
    /// Tasks timed out and eligible for re-dispatch, per worker.
    pub requests_retries: CounterVec,
    /// Heartbeats observed, per worker.
    pub workers_heartbeats: CounterVec,
    /// Last reported worker capacity.
    pub workers_capacity: GaugeVec,
    /// Last reported worker free slots.
    pub workers_available: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_published = Counter::new(
            "transcoding_requests_published",
            "Number of task payloads published to worker inboxes",
        )?;
        let requests_running = GaugeVec::new(
            Opts::new(
                "transcoding_requests_running",
                "Number of tasks currently observed",
            ),
            &[LABEL_WORKER_NAME],
        )?;
        let requests_done = CounterVec::new(
            Opts::new(
                "transcoding_requests_done",
                "Number of tasks completed and ingested",
            ),
            &[LABEL_WORKER_NAME],
        )?;
        let requests_errors = CounterVec::new(
            Opts::new(
                "transcoding_requests_errors",
                "Number of tasks terminated with an error",
            ),
            &[LABEL_WORKER_NAME],
        )?;
        let requests_retries = CounterVec::new(
            Opts::new(
                "transcoding_requests_retries",
                "Number of tasks timed out and returned for re-dispatch",
            ),
            &[LABEL_WORKER_NAME],
        )?;
        let workers_heartbeats = CounterVec::new(
            Opts::new("workers_heartbeats", "Number of worker heartbeats observed"),
            &[LABEL_WORKER_NAME],
        )?;
        let workers_capacity = GaugeVec::new(
            Opts::new("workers_capacity", "Last reported worker capacity"),
            &[LABEL_WORKER_NAME],
        )?;
        let workers_available = GaugeVec::new(
            Opts::new("workers_available", "Last reported worker free slots"),
            &[LABEL_WORKER_NAME],
        )?;

        registry.register(Box::new(requests_published.clone()))?;
        registry.register(Box::new(requests_running.clone()))?;
        registry.register(Box::new(requests_done.clone()))?;
        registry.register(Box::new(requests_errors.clone()))?;
        registry.register(Box::new(requests_retries.clone()))?;
        registry.register(Box::new(workers_heartbeats.clone()))?;
        registry.register(Box::new(workers_capacity.clone()))?;
        registry.register(Box::new(workers_available.clone()))?;

        Ok(Self {
            registry,
            requests_published,
            requests_running,
            requests_done,
            requests_errors,
            requests_retries,
            workers_heartbeats,
            workers_capacity,
            workers_available,
        })
    }

    pub fn inc_running(&self, worker: &str) {
        self.requests_running.with_label_values(&[worker]).inc();
    }

    pub fn dec_running(&self, worker: &str) {
        self.requests_running.with_label_values(&[worker]).dec();
    }

    pub fn inc_done(&self, worker: &str) {
        self.requests_done.with_label_values(&[worker]).inc();
    }

    pub fn inc_errors(&self, worker: &str) {
        self.requests_errors.with_label_values(&[worker]).inc();
    }

    pub fn inc_retries(&self, worker: &str) {
        self.requests_retries.with_label_values(&[worker]).inc();
    }

    pub fn inc_heartbeats(&self, worker: &str) {
        self.workers_heartbeats.with_label_values(&[worker]).inc();
    }

    /// Records a worker's self-reported capacity.
    pub fn observe_worker(&self, worker: &str, capacity: u32, available: u32) {
        self.workers_capacity
            .with_label_values(&[worker])
            .set(capacity as f64);
        self.workers_available
            .with_label_values(&[worker])
            .set(available as f64);
    }

    /// Current value of the error counter for a worker. Test support.
    pub fn errors_for(&self, worker: &str) -> f64 {
        self.requests_errors.with_label_values(&[worker]).get()
    }

    /// Current value of the done counter for a worker. Test support.
    pub fn done_for(&self, worker: &str) -> f64 {
        self.requests_done.with_label_values(&[worker]).get()
    }

    /// Returns the metrics in Prometheus text format.
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}
