use metrics::{counter, Counter};

#[derive(Clone)]
pub struct Telemetry {
    submits_succeeded: Counter,
    submits_failed: Counter,
    records_sent: Counter,
    records_dropped: Counter,
}

impl Telemetry {
    pub fn new(backend: &'static str) -> Self {
        Self {
            submits_succeeded: counter!("tally_backend_submits_total", "backend" => backend, "result" => "success"),
            submits_failed: counter!("tally_backend_submits_total", "backend" => backend, "result" => "failure"),
            records_sent: counter!("tally_backend_records_sent_total", "backend" => backend),
            records_dropped: counter!("tally_backend_records_dropped_total", "backend" => backend),
        }
    }

    pub fn record_success(&self, records: usize) {
        self.submits_succeeded.increment(1);
        self.records_sent.increment(records as u64);
    }

    pub fn record_failure(&self, records: usize) {
        self.submits_failed.increment(1);
        self.records_dropped.increment(records as u64);
    }
}
