use metrics::{counter, Counter};

#[derive(Clone)]
pub struct Telemetry {
    packets_received: Counter,
    bytes_received: Counter,
    lines_ingested: Counter,
    lines_failed: Counter,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            packets_received: counter!("tally_statsd_packets_received_total"),
            bytes_received: counter!("tally_statsd_bytes_received_total"),
            lines_ingested: counter!("tally_statsd_lines_total", "result" => "ingested"),
            lines_failed: counter!("tally_statsd_lines_total", "result" => "parse_failure"),
        }
    }

    pub fn record_packet(&self, len: usize) {
        self.packets_received.increment(1);
        self.bytes_received.increment(len as u64);
    }

    pub fn record_ingested(&self, lines: usize) {
        self.lines_ingested.increment(lines as u64);
    }

    pub fn record_parse_failure(&self) {
        self.lines_failed.increment(1);
    }
}
