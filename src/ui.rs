use anyhow::Context;
use clap::Parser;
use log::info;
use serde::Serialize;
use std::path::PathBuf;
use toml::Table;

use crate::base::module::ComponentId;
use crate::mem::arb::{ArbPort, ArbiterStats, DramArb};
use crate::mem::simple::{MemStats, SimpleMemory};
use crate::sim::config::{ArbiterConfig, Config, MemConfig, SimConfig};
use crate::sim::top::{RunSummary, Sim};
use crate::traffic::config::TrafficConfig;
use crate::traffic::source::{TrafficSource, TrafficStats};

#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct DramArbArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: PathBuf,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    pub log: Option<u64>,
    #[arg(long, help = "Stop the run at this tick")]
    pub timeout: Option<u64>,
    #[arg(long, help = "Override number of banks")]
    pub num_banks: Option<usize>,
    #[arg(long, help = "Override number of upstreams per bank")]
    pub num_upstreams: Option<usize>,
    #[arg(long, help = "Override per-bank buffer size")]
    pub buffer_size: Option<usize>,
    #[arg(long, help = "Write run statistics as JSON to this path")]
    pub results_json: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub run: RunSummary,
    pub arbiter: ArbiterStats,
    pub memories: Vec<MemStats>,
    pub sources: Vec<TrafficStats>,
}

/// One arbiter, one memory per bank and one traffic source per upstream.
pub struct System {
    pub sim: Sim,
    pub config: SimConfig,
    pub arb: ComponentId,
    pub memories: Vec<ComponentId>,
    pub sources: Vec<ComponentId>,
}

impl System {
    pub fn run(&mut self) -> anyhow::Result<RunSummary> {
        self.sim.init().context("initialising components")?;
        let summary = self.sim.run(self.config.timeout).context("simulation aborted")?;
        Ok(summary)
    }

    pub fn all_done(&self) -> bool {
        self.sources.iter().all(|&id| {
            self.sim
                .object::<TrafficSource>(id)
                .is_some_and(TrafficSource::is_done)
        })
    }

    pub fn report(&self) -> anyhow::Result<Report> {
        let arbiter = self
            .sim
            .object::<DramArb>(self.arb)
            .context("arbiter missing")?
            .stats()
            .clone();
        let memories: Vec<MemStats> = self
            .memories
            .iter()
            .map(|&id| {
                self.sim
                    .object::<SimpleMemory>(id)
                    .map(|m| m.stats().clone())
                    .context("memory missing")
            })
            .collect::<anyhow::Result<_>>()?;
        let sources: Vec<TrafficStats> = self
            .sources
            .iter()
            .map(|&id| {
                self.sim
                    .object::<TrafficSource>(id)
                    .map(|s| s.stats().clone())
                    .context("traffic source missing")
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(Report {
            run: self.sim.summary(),
            arbiter,
            memories,
            sources,
        })
    }
}

/// Make a System from the TOML configuration.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_sim(toml_string: &str, cli_args: Option<DramArbArgs>) -> anyhow::Result<System> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let mut sim_config = SimConfig::from_section(config_table.get("sim"))?;
    let mut arb_config = ArbiterConfig::from_section(config_table.get("arbiter"))?;
    let mem_config = MemConfig::from_section(config_table.get("mem"))?;
    let traffic_config = TrafficConfig::from_section(config_table.get("traffic"))?;

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        sim_config.log_level = args.log.unwrap_or(sim_config.log_level);
        sim_config.timeout = args.timeout.unwrap_or(sim_config.timeout);
        sim_config.results_json = args.results_json.or(sim_config.results_json);
        arb_config.num_banks = args.num_banks.unwrap_or(arb_config.num_banks);
        arb_config.num_upstreams = args.num_upstreams.unwrap_or(arb_config.num_upstreams);
        arb_config.buffer_size = args.buffer_size.unwrap_or(arb_config.buffer_size);
    }

    let mut sim = Sim::new("dramarb");
    let arb = sim.add_object(|id, sim| DramArb::new(id, sim, "arb", arb_config))?;

    let mut memories = Vec::with_capacity(arb_config.num_banks);
    for bank in 0..arb_config.num_banks {
        let mem = sim.add_object(|id, sim| SimpleMemory::new(id, sim, format!("mem{}", bank), mem_config))?;
        let down = arb_port(&sim, arb, ArbPort::Request { bank })?;
        let mem_side = sim.object::<SimpleMemory>(mem).context("memory missing")?.port();
        sim.bind(down, mem_side)?;
        memories.push(mem);
    }

    let mut sources = Vec::with_capacity(arb_config.num_upstreams);
    for upstream in 0..arb_config.num_upstreams {
        let traffic = traffic_config.clone();
        let source = sim.add_object(|id, sim| {
            TrafficSource::new(id, sim, format!("up{}", upstream), upstream, arb_config.num_banks, traffic)
        })?;
        for bank in 0..arb_config.num_banks {
            let buf_side = sim
                .object::<TrafficSource>(source)
                .context("traffic source missing")?
                .port(bank)?;
            let resp = arb_port(&sim, arb, ArbPort::Response { bank, upstream })?;
            sim.bind(buf_side, resp)?;
        }
        sources.push(source);
    }
    info!(
        "built {} banks, {} upstreams, timeout {}",
        arb_config.num_banks, arb_config.num_upstreams, sim_config.timeout
    );

    Ok(System {
        sim,
        config: sim_config,
        arb,
        memories,
        sources,
    })
}

fn arb_port(sim: &Sim, arb: ComponentId, role: ArbPort) -> anyhow::Result<crate::base::port::PortId> {
    let port = sim
        .object::<DramArb>(arb)
        .context("arbiter missing")?
        .port(role)?;
    Ok(port)
}
