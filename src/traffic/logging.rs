use log::{debug, info};

use crate::base::packet::PacketPtr;
use crate::timeq::Tick;
use crate::traffic::source::TrafficStats;

pub struct TrafficLogger;

impl TrafficLogger {
    pub fn log_response(source: &str, tick: Tick, pkt: &PacketPtr, latency: Tick) {
        debug!(
            "[TRAFFIC] {} {} completed at time {:>10} latency {}",
            source, pkt, tick, latency
        );
    }

    pub fn log_source_done(source: &str, tick: Tick, stats: &TrafficStats) {
        info!(
            "[TRAFFIC] {} all done at time {:>10}: {} reads, {} writes, avg read latency {:.2}",
            source,
            tick,
            stats.completed_reads,
            stats.issued_writes,
            stats.avg_latency()
        );
    }
}
