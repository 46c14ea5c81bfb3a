use std::fs;

use anyhow::Context;
use clap::Parser;
use dramarb::sim::config::{Config, SimConfig};
use dramarb::sim::log::init_logging;
use dramarb::ui::{make_sim, DramArbArgs};
use toml::Table;

pub fn main() -> anyhow::Result<()> {
    let argv = DramArbArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    // logger first so config warnings show up
    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;
    let sim_config = SimConfig::from_section(config_table.get("sim"))?;
    init_logging(argv.log.unwrap_or(sim_config.log_level));

    let mut system = make_sim(&config, Some(argv))?;

    let summary = system.run()?;
    let report = system.report()?;

    println!(
        "finished at tick {} after {} events (drained: {}, all sources done: {})",
        summary.final_tick,
        summary.events,
        summary.drained,
        system.all_done()
    );
    let arb = &report.arbiter;
    println!(
        "arbiter: {} reads / {} writes accepted, {} rejected, {} responses delivered, peak outstanding {}",
        arb.reads_accepted, arb.writes_accepted, arb.requests_rejected, arb.responses_delivered, arb.peak_outstanding
    );
    for (idx, stats) in report.sources.iter().enumerate() {
        println!(
            "up{}: {} reads, {} writes, avg read latency {:.2}",
            idx,
            stats.completed_reads,
            stats.issued_writes,
            stats.avg_latency()
        );
    }

    if let Some(path) = &system.config.results_json {
        let json = serde_json::to_string_pretty(&report).context("cannot serialise results")?;
        fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(())
}
