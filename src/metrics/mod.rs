//! Prometheus Metrics
//!
//! Process-wide counters, registered once in the default registry and
//! labelled by edge index. The binary serves them on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

use crate::cache::key_value::Hitflag;
use crate::error::{Error, Result};

/// Client requests by serving edge and outcome
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgecoop_requests_total",
        "Client requests served, by edge and hitflag",
        &["edge", "hitflag"]
    )
    .expect("edgecoop_requests_total registers once")
});

/// Objects evicted for capacity
pub static EVICTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgecoop_evictions_total",
        "Objects evicted for capacity, by edge",
        &["edge"]
    )
    .expect("edgecoop_evictions_total registers once")
});

/// Placement notifications sent
pub static PLACEMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgecoop_placements_total",
        "Placement notifications sent, by edge",
        &["edge"]
    )
    .expect("edgecoop_placements_total registers once")
});

pub fn record_request(edge_idx: u32, hitflag: Hitflag) {
    REQUESTS_TOTAL
        .with_label_values(&[&edge_idx.to_string(), hitflag.as_str()])
        .inc();
}

pub fn record_evictions(edge_idx: u32, count: usize) {
    EVICTIONS_TOTAL
        .with_label_values(&[&edge_idx.to_string()])
        .inc_by(count as u64);
}

pub fn record_placement(edge_idx: u32) {
    PLACEMENTS_TOTAL
        .with_label_values(&[&edge_idx.to_string()])
        .inc();
}

/// Render every registered metric in the text exposition format
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_exposition() {
        record_request(42, Hitflag::CooperativeHit);
        record_evictions(42, 3);
        record_placement(42);

        let text = gather_text().unwrap();
        assert!(text.contains("edgecoop_requests_total"));
        assert!(text.contains("hitflag=\"cooperative_hit\""));
        assert!(text.contains("edgecoop_evictions_total"));
        assert!(text.contains("edgecoop_placements_total"));
        assert!(EVICTIONS_TOTAL.with_label_values(&["42"]).get() >= 3);
    }
}
