//! Campaign runner: many seeds over one parameter set, reporting the first
//! failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::network::FaultConfig;
use crate::oracle::{ConvergenceOracle, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Seeds to run and the simulation parameters shared by all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub replica_count: usize,
    pub rounds: u64,
    pub fanout: usize,
    pub key_space: usize,
    pub write_rate_percent: u8,
    pub fault: FaultConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            replica_count: sim.replica_count,
            rounds: sim.rounds,
            fanout: sim.fanout,
            key_space: sim.key_space,
            write_rate_percent: sim.write_rate_percent,
            fault: sim.fault,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            replica_count: self.replica_count,
            rounds: self.rounds,
            fanout: self.fanout,
            key_space: self.key_space,
            write_rate_percent: self.write_rate_percent,
            fault: self.fault,
            ..SimulationConfig::default()
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.replica_count == 0 {
            bail!("replica_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.key_space == 0 {
            bail!("key_space must be > 0");
        }
        Ok(())
    }
}

/// Why one seed failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate outcome of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed, for prioritized replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds whose run held concurrent heads at some point.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Full result of replaying one seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed in the campaign.
///
/// Engine errors inside a seed count as that seed's failure.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let violations = match replay_seed(seed, config) {
            Ok(trace) => {
                if trace.result.interesting_state_reached() {
                    report.interesting_states_reached += 1;
                }
                let mut violations: Vec<String> =
                    trace.oracle.violations.iter().map(ToString::to_string).collect();
                if !trace.result.quiescent {
                    violations.push(format!(
                        "Quiescence: heads still moving after {} anti-entropy passes",
                        trace.result.anti_entropy_passes
                    ));
                }
                violations
            }
            Err(err) => vec![format!("Engine: {err:#}")],
        };

        if violations.is_empty() {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure { seed, violations });
        }
    }

    Ok(report)
}

/// Run one seed and check it.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the engine fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = ConvergenceOracle::check_all(simulator.replicas())?;
    Ok(DetailedTrace { result, oracle })
}
