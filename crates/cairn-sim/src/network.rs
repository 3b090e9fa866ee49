use cairn_core::{Block, Head};
use serde::{Deserialize, Serialize};

use crate::replica::ReplicaId;
use crate::rng::DeterministicRng;

/// Fault injection settings for simulated delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of sends dropped.
    pub drop_rate_percent: u8,
    /// Percentage of sends delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of reversing the ready batch at a tick.
    pub reorder_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 10,
            duplicate_rate_percent: 5,
            reorder_rate_percent: 10,
        }
    }
}

impl FaultConfig {
    /// A network that delivers everything, in order, immediately.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
        }
    }
}

/// A replica's head plus every block it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub from: ReplicaId,
    pub to: ReplicaId,
    pub head: Head,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone)]
struct Pending {
    deliver_at_round: u64,
    message: SyncMessage,
}

/// What happened to one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub dropped: bool,
    pub duplicated: bool,
    pub delay_rounds: u8,
}

/// Deterministic fault-injecting network.
#[derive(Debug, Clone, Default)]
pub struct SimulatedNetwork {
    pending: Vec<Pending>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Number of in-flight messages.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue `message` for delivery, subject to the configured faults.
    pub fn send(
        &mut self,
        message: SyncMessage,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        if rng.percent(self.fault.drop_rate_percent) {
            return SendOutcome {
                dropped: true,
                duplicated: false,
                delay_rounds: 0,
            };
        }

        let bound = u64::from(self.fault.max_delay_rounds) + 1;
        let delay = u8::try_from(rng.below(bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = rng.percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.pending.push(Pending {
                deliver_at_round,
                message: message.clone(),
            });
        }
        self.pending.push(Pending {
            deliver_at_round,
            message,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Remove and return every message due by `round`.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> Vec<SyncMessage> {
        let (ready, future): (Vec<Pending>, Vec<Pending>) = self
            .pending
            .drain(..)
            .partition(|p| p.deliver_at_round <= round);
        self.pending = future;

        let mut ready: Vec<SyncMessage> = ready.into_iter().map(|p| p.message).collect();
        if ready.len() > 1 && rng.percent(self.fault.reorder_rate_percent) {
            ready.reverse();
        }
        ready
    }

    /// Everything still in flight, regardless of delay.
    pub fn drain(&mut self) -> Vec<SyncMessage> {
        self.pending.drain(..).map(|p| p.message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: ReplicaId, to: ReplicaId) -> SyncMessage {
        SyncMessage {
            from,
            to,
            head: Head::new(),
            blocks: Vec::new(),
        }
    }

    #[test]
    fn reliable_network_delivers_immediately() {
        let mut network = SimulatedNetwork::new(FaultConfig::reliable());
        let mut rng = DeterministicRng::new(1);
        for to in 1..4 {
            let outcome = network.send(message(0, to), 5, &mut rng);
            assert!(!outcome.dropped);
            assert_eq!(outcome.delay_rounds, 0);
        }
        let delivered = network.deliver_ready(5, &mut rng);
        let targets: Vec<ReplicaId> = delivered.iter().map(|m| m.to).collect();
        assert_eq!(targets, [1, 2, 3]);
        assert_eq!(network.pending_len(), 0);
    }

    #[test]
    fn total_drop_loses_everything() {
        let fault = FaultConfig {
            drop_rate_percent: 100,
            ..FaultConfig::reliable()
        };
        let mut network = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(2);
        assert!(network.send(message(0, 1), 0, &mut rng).dropped);
        assert_eq!(network.pending_len(), 0);
    }

    #[test]
    fn duplicates_arrive_twice() {
        let fault = FaultConfig {
            duplicate_rate_percent: 100,
            ..FaultConfig::reliable()
        };
        let mut network = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(3);
        assert!(network.send(message(0, 1), 0, &mut rng).duplicated);
        assert_eq!(network.deliver_ready(0, &mut rng).len(), 2);
    }

    #[test]
    fn delayed_messages_wait_for_their_round() {
        let fault = FaultConfig {
            max_delay_rounds: 3,
            ..FaultConfig::reliable()
        };
        let mut network = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(4);
        let mut latest = 0;
        for _ in 0..20 {
            let outcome = network.send(message(0, 1), 10, &mut rng);
            assert!(outcome.delay_rounds <= 3);
            latest = latest.max(u64::from(outcome.delay_rounds));
        }
        let mut delivered = network.deliver_ready(9, &mut rng).len();
        assert_eq!(delivered, 0);
        for round in 10..=10 + latest {
            delivered += network.deliver_ready(round, &mut rng).len();
        }
        assert_eq!(delivered, 20);
        assert!(network.drain().is_empty());
    }
}
