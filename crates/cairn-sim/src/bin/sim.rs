#![forbid(unsafe_code)]

use std::env;

use anyhow::{Result, bail};
use cairn_sim::campaign::{CampaignConfig, run_campaign};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CAIRN_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "cairn_core=debug,cairn_sim=debug,info"
        } else {
            "cairn_sim=info,warn"
        })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let report = run_campaign(&CampaignConfig::default())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.all_passed() {
        bail!(
            "{} of {} seeds failed, first at seed {:?}",
            report.failures.len(),
            report.seeds_run,
            report.first_failure
        );
    }
    Ok(())
}
