use std::path::PathBuf;

use clap::Parser;
use lithos_pool::PoolConfig;
use serde::Deserialize;

mod workload;

use workload::WorkloadParams;

#[derive(Parser, Debug)]
#[command(name = "lithos", about = "Chunk container pool workload driver")]
struct Args {
    /// TOML with pool settings at the top level and an optional [workload]
    /// table; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Scheduling ticks to run.
    #[arg(long)]
    ticks: Option<u32>,
    /// Chunk ring radius around the origin.
    #[arg(long)]
    radius: Option<i32>,
    /// Terrain noise seed.
    #[arg(long)]
    seed: Option<i32>,
    /// Every Nth chunk gets a dedicated container.
    #[arg(long)]
    isolated_every: Option<usize>,
    /// Every Nth chunk asks for the highest fidelity class.
    #[arg(long)]
    precise_every: Option<usize>,
}

/// The `[workload]` table of the driver config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DriverConfig {
    workload: WorkloadParams,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (cfg, mut params) = match &args.config {
        Some(path) => {
            let cfg = match PoolConfig::from_path(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::error!("failed to load {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            let driver: DriverConfig = match std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|text| toml::from_str(&text).map_err(|e| e.to_string()))
            {
                Ok(d) => d,
                Err(e) => {
                    log::error!("failed to load {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            (cfg, driver.workload)
        }
        None => (PoolConfig::default(), WorkloadParams::default()),
    };

    if let Some(t) = args.ticks {
        params.ticks = t;
    }
    if let Some(r) = args.radius {
        params.radius = r;
    }
    if let Some(s) = args.seed {
        params.seed = s;
    }
    if let Some(n) = args.isolated_every {
        params.isolated_every = n.max(1);
    }
    if let Some(n) = args.precise_every {
        params.precise_every = n.max(1);
    }

    workload::run(cfg, params);
}
