//! Deterministic multi-replica simulation for cairn.
//!
//! Each run seeds N replicas from one shared genesis write, then for a
//! number of rounds lets every replica write a random batch and push a sync
//! message (its head plus all blocks) to a few peers over a faulty network.
//! Afterwards an anti-entropy exchange runs until no head moves and
//! [`oracle::ConvergenceOracle`] checks that every replica agrees.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod replica;
pub mod rng;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::network::{FaultConfig, SimulatedNetwork, SyncMessage};
use crate::replica::{Replica, ReplicaId, ReplicaState};
use crate::rng::DeterministicRng;

/// Parameters of one seeded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub replica_count: usize,
    pub rounds: u64,
    /// Peers each replica pushes to per round.
    pub fanout: usize,
    /// Number of distinct document keys writes draw from.
    pub key_space: usize,
    /// Percentage chance a replica writes in a given round.
    pub write_rate_percent: u8,
    pub fault: FaultConfig,
    /// Upper bound on full anti-entropy exchanges at the end of a run.
    pub max_anti_entropy_passes: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            replica_count: 4,
            rounds: 12,
            fanout: 2,
            key_space: 8,
            write_rate_percent: 70,
            fault: FaultConfig::default(),
            max_anti_entropy_passes: 4,
        }
    }
}

/// One step of the run, for replay and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    Write {
        replica: ReplicaId,
        puts: Vec<String>,
        deletes: Vec<String>,
        head_len: usize,
    },
    Send {
        from: ReplicaId,
        to: ReplicaId,
        dropped: bool,
        duplicated: bool,
        delay_rounds: u8,
    },
    Deliver {
        from: ReplicaId,
        to: ReplicaId,
        advanced: bool,
    },
    AntiEntropy {
        pass: usize,
        advanced: usize,
    },
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    pub states: Vec<ReplicaState>,
    /// Widest head any replica held during the run.
    pub max_head_width: usize,
    pub anti_entropy_passes: usize,
    pub quiescent: bool,
}

impl SimulationResult {
    /// Whether the run exercised concurrent heads.
    #[must_use]
    pub const fn interesting_state_reached(&self) -> bool {
        self.max_head_width > 1
    }
}

/// Drives replicas and the network for one seed.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    replicas: Vec<Replica>,
    network: SimulatedNetwork,
    rng: DeterministicRng,
    trace: Vec<TraceEvent>,
    max_head_width: usize,
}

impl Simulator {
    /// Create the replicas and share the genesis write among them.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty replica set or if seeding fails.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.replica_count == 0 {
            bail!("replica_count must be > 0");
        }
        let replicas: Vec<Replica> = (0..config.replica_count).map(Replica::new).collect();
        if let Some((first, rest)) = replicas.split_first() {
            first.write_genesis()?;
            for replica in rest {
                replica.receive(&first.sync_message(replica.id()))?;
            }
        }
        Ok(Self {
            config,
            replicas,
            network: SimulatedNetwork::new(config.fault),
            rng: DeterministicRng::new(config.seed),
            trace: Vec::new(),
            max_head_width: 1,
        })
    }

    #[must_use]
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// Run every round, then anti-entropy, and snapshot the replicas.
    ///
    /// # Errors
    ///
    /// Returns an error if any engine operation fails.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.step(round)?;
        }

        let end = self.config.rounds;
        for message in self.network.drain() {
            self.deliver(end, &message)?;
        }
        let (passes, quiescent) = self.anti_entropy(end)?;

        let states = self
            .replicas
            .iter()
            .map(Replica::state)
            .collect::<Result<Vec<_>>>()?;
        info!(
            seed = self.config.seed,
            trace = self.trace.len(),
            max_head_width = self.max_head_width,
            passes,
            quiescent,
            "simulation finished"
        );
        Ok(SimulationResult {
            trace: std::mem::take(&mut self.trace),
            states,
            max_head_width: self.max_head_width,
            anti_entropy_passes: passes,
            quiescent,
        })
    }

    fn step(&mut self, round: u64) -> Result<()> {
        for index in 0..self.replicas.len() {
            if !self.rng.percent(self.config.write_rate_percent) {
                continue;
            }
            let summary =
                self.replicas[index].write_random(round, self.config.key_space, &mut self.rng)?;
            self.max_head_width = self.max_head_width.max(summary.head_len);
            self.trace.push(TraceEvent {
                round,
                kind: TraceEventKind::Write {
                    replica: index,
                    puts: summary.puts,
                    deletes: summary.deletes,
                    head_len: summary.head_len,
                },
            });

            let peers = self
                .rng
                .peers(self.replicas.len(), index, self.config.fanout);
            for to in peers {
                let message = self.replicas[index].sync_message(to);
                let outcome = self.network.send(message, round, &mut self.rng);
                self.trace.push(TraceEvent {
                    round,
                    kind: TraceEventKind::Send {
                        from: index,
                        to,
                        dropped: outcome.dropped,
                        duplicated: outcome.duplicated,
                        delay_rounds: outcome.delay_rounds,
                    },
                });
            }
        }

        for message in self.network.deliver_ready(round, &mut self.rng) {
            self.deliver(round, &message)?;
        }
        Ok(())
    }

    fn deliver(&mut self, round: u64, message: &SyncMessage) -> Result<bool> {
        let Some(replica) = self.replicas.get(message.to) else {
            bail!("message addressed to unknown replica {}", message.to);
        };
        let advanced = replica.receive(message)?;
        self.max_head_width = self.max_head_width.max(replica.head().len());
        self.trace.push(TraceEvent {
            round,
            kind: TraceEventKind::Deliver {
                from: message.from,
                to: message.to,
                advanced,
            },
        });
        Ok(advanced)
    }

    /// All-pairs exchanges over a reliable channel until no head moves.
    fn anti_entropy(&mut self, round: u64) -> Result<(usize, bool)> {
        for pass in 1..=self.config.max_anti_entropy_passes {
            let messages: Vec<SyncMessage> = self
                .replicas
                .iter()
                .flat_map(|from| {
                    self.replicas
                        .iter()
                        .filter(move |to| to.id() != from.id())
                        .map(move |to| from.sync_message(to.id()))
                })
                .collect();

            let mut advanced = 0;
            for message in &messages {
                if self.deliver(round, message)? {
                    advanced += 1;
                }
            }
            debug!(pass, advanced, "anti-entropy pass");
            self.trace.push(TraceEvent {
                round,
                kind: TraceEventKind::AntiEntropy { pass, advanced },
            });
            if advanced == 0 {
                return Ok((pass, true));
            }
        }
        Ok((self.config.max_anti_entropy_passes, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_replicas_rejected() {
        let config = SimulationConfig {
            replica_count: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn replicas_start_from_a_shared_genesis() {
        let sim = Simulator::new(SimulationConfig::default()).unwrap();
        let head = sim.replicas()[0].head();
        assert_eq!(head.len(), 1);
        assert!(sim.replicas().iter().all(|r| r.head() == head));
    }

    #[test]
    fn default_run_is_quiescent() {
        let mut sim = Simulator::new(SimulationConfig::default()).unwrap();
        let result = sim.run().unwrap();
        assert!(result.quiescent);
        assert!(!result.trace.is_empty());
        let head = &result.states[0].head;
        assert!(result.states.iter().all(|s| &s.head == head));
    }

    #[test]
    fn trace_serializes_with_tags() {
        let event = TraceEvent {
            round: 2,
            kind: TraceEventKind::Deliver {
                from: 0,
                to: 1,
                advanced: true,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"deliver\""));
    }
}
