use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use cairn_core::{Change, ChangesOptions, Document, Link};
use serde_json::{Map, Value};

use crate::replica::{Replica, ReplicaId, ReplicaState};

/// Outcome of the post-run invariant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// A single failed invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Two replicas ended on different heads.
    HeadDivergence {
        replica_a: ReplicaId,
        replica_b: ReplicaId,
        only_in_a: Vec<Link>,
        only_in_b: Vec<Link>,
    },
    /// Same head, different documents.
    EntriesDivergence {
        replica_a: ReplicaId,
        replica_b: ReplicaId,
        keys: Vec<String>,
    },
    /// A head that is not sorted and duplicate-free.
    NonCanonicalHead { replica: ReplicaId },
    /// Merging an already-known head moved the replica.
    Idempotence { replica: ReplicaId, from: ReplicaId },
    /// The full change feed disagrees with the replica's documents.
    FeedDivergence { replica: ReplicaId, keys: Vec<String> },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeadDivergence {
                replica_a,
                replica_b,
                only_in_a,
                only_in_b,
            } => write!(
                f,
                "HeadDivergence: replicas {replica_a} and {replica_b} differ \
                 (only_in_a={}, only_in_b={})",
                only_in_a.len(),
                only_in_b.len()
            ),
            Self::EntriesDivergence {
                replica_a,
                replica_b,
                keys,
            } => write!(
                f,
                "EntriesDivergence: replicas {replica_a} and {replica_b} disagree on {keys:?}"
            ),
            Self::NonCanonicalHead { replica } => {
                write!(f, "NonCanonicalHead: replica {replica}")
            }
            Self::Idempotence { replica, from } => write!(
                f,
                "Idempotence: re-merging the head of replica {from} moved replica {replica}"
            ),
            Self::FeedDivergence { replica, keys } => write!(
                f,
                "FeedDivergence: change feed of replica {replica} disagrees on {keys:?}"
            ),
        }
    }
}

/// Post-run convergence checks over every replica.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Run every check.
    ///
    /// # Errors
    ///
    /// Returns an error if a replica's state cannot be read or a re-merge
    /// fails outright.
    pub fn check_all(replicas: &[Replica]) -> Result<OracleResult> {
        let states = replicas
            .iter()
            .map(Replica::state)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::check_canonical(&states)
            .merge(Self::check_convergence(&states))
            .merge(Self::check_change_feed(replicas, &states)?)
            .merge(Self::check_idempotence(replicas)?))
    }

    /// Every head is canonical.
    #[must_use]
    pub fn check_canonical(states: &[ReplicaState]) -> OracleResult {
        OracleResult::from_violations(
            states
                .iter()
                .filter(|s| !s.head.is_canonical())
                .map(|s| InvariantViolation::NonCanonicalHead { replica: s.id })
                .collect(),
        )
    }

    /// Every replica matches the first on head and documents.
    #[must_use]
    pub fn check_convergence(states: &[ReplicaState]) -> OracleResult {
        let Some((first, rest)) = states.split_first() else {
            return OracleResult::pass();
        };
        let mut violations = Vec::new();
        for other in rest {
            if first.head != other.head {
                let a: BTreeSet<&Link> = first.head.iter().collect();
                let b: BTreeSet<&Link> = other.head.iter().collect();
                violations.push(InvariantViolation::HeadDivergence {
                    replica_a: first.id,
                    replica_b: other.id,
                    only_in_a: a.difference(&b).map(|l| (*l).clone()).collect(),
                    only_in_b: b.difference(&a).map(|l| (*l).clone()).collect(),
                });
            } else if first.entries != other.entries {
                violations.push(InvariantViolation::EntriesDivergence {
                    replica_a: first.id,
                    replica_b: other.id,
                    keys: differing_keys(&first.entries, &other.entries),
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// The change feed from the beginning reports exactly the live
    /// documents, with the same values.
    ///
    /// # Errors
    ///
    /// Returns an error if a replica's change feed cannot be read.
    pub fn check_change_feed(
        replicas: &[Replica],
        states: &[ReplicaState],
    ) -> Result<OracleResult> {
        let mut violations = Vec::new();
        for (replica, state) in replicas.iter().zip(states) {
            let changes = replica
                .crdt()
                .changes(&[], ChangesOptions::default())
                .with_context(|| format!("replica {} failed to read changes", replica.id()))?;
            let keys = feed_divergence(&changes.updates, &state.entries);
            if !keys.is_empty() {
                violations.push(InvariantViolation::FeedDivergence {
                    replica: replica.id(),
                    keys,
                });
            }
        }
        Ok(OracleResult::from_violations(violations))
    }

    /// Re-delivering any replica's current head to any other is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a merge fails.
    pub fn check_idempotence(replicas: &[Replica]) -> Result<OracleResult> {
        let mut violations = Vec::new();
        for target in replicas {
            for source in replicas {
                if source.id() == target.id() {
                    continue;
                }
                if target.receive(&source.sync_message(target.id()))? {
                    violations.push(InvariantViolation::Idempotence {
                        replica: target.id(),
                        from: source.id(),
                    });
                }
            }
        }
        Ok(OracleResult::from_violations(violations))
    }
}

fn differing_keys(a: &[Document], b: &[Document]) -> Vec<String> {
    let a: BTreeSet<(&str, &Link)> = a.iter().map(|d| (d.key.as_str(), &d.link)).collect();
    let b: BTreeSet<(&str, &Link)> = b.iter().map(|d| (d.key.as_str(), &d.link)).collect();
    let keys: BTreeSet<String> = a
        .symmetric_difference(&b)
        .map(|(key, _)| (*key).to_string())
        .collect();
    keys.into_iter().collect()
}

/// Keys on which the live part of `feed` and `entries` disagree.
fn feed_divergence(feed: &[Change], entries: &[Document]) -> Vec<String> {
    let fed: BTreeMap<&str, &Map<String, Value>> = feed
        .iter()
        .filter_map(|c| c.value.as_ref().map(|v| (c.key.as_str(), v)))
        .collect();
    let live: BTreeMap<&str, &Map<String, Value>> =
        entries.iter().map(|d| (d.key.as_str(), &d.value)).collect();
    let keys: BTreeSet<&str> = fed.keys().chain(live.keys()).copied().collect();
    keys.into_iter()
        .filter(|key| fed.get(key) != live.get(key))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use cairn_core::Head;

    use super::*;
    use crate::rng::DeterministicRng;

    fn state(id: ReplicaId, head: Vec<Link>) -> ReplicaState {
        ReplicaState {
            id,
            head: Head::from_links(head),
            entries: Vec::new(),
        }
    }

    #[test]
    fn identical_states_pass() {
        let link = Link::digest(b"x");
        let states = [state(0, vec![link.clone()]), state(1, vec![link])];
        assert!(ConvergenceOracle::check_convergence(&states).passed);
        assert!(ConvergenceOracle::check_canonical(&states).passed);
    }

    #[test]
    fn diverging_heads_are_reported() {
        let x = Link::digest(b"x");
        let y = Link::digest(b"y");
        let states = [state(0, vec![x.clone()]), state(1, vec![y.clone()])];
        let result = ConvergenceOracle::check_convergence(&states);
        assert!(!result.passed);
        assert_eq!(
            result.violations,
            [InvariantViolation::HeadDivergence {
                replica_a: 0,
                replica_b: 1,
                only_in_a: vec![x],
                only_in_b: vec![y],
            }]
        );
        assert!(result.violations[0].to_string().contains("replicas 0 and 1"));
    }

    #[test]
    fn unsorted_head_is_not_canonical() {
        let mut links = vec![Link::digest(b"a"), Link::digest(b"b")];
        links.sort();
        links.reverse();
        let result = ConvergenceOracle::check_canonical(&[state(3, links)]);
        assert_eq!(
            result.violations,
            [InvariantViolation::NonCanonicalHead { replica: 3 }]
        );
    }

    #[test]
    fn feed_divergence_names_mismatched_keys() {
        let body = |n: u64| {
            let mut map = Map::new();
            map.insert("n".into(), Value::from(n));
            map
        };
        let clock = Link::digest(b"event");
        let change = |key: &str, value: Option<Map<String, Value>>| Change {
            key: key.to_string(),
            deleted: value.is_none(),
            value,
            clock: clock.clone(),
        };
        let document = |key: &str, value: Map<String, Value>| Document {
            key: key.to_string(),
            link: Link::digest(key.as_bytes()),
            value,
        };

        let feed = [
            change("same", Some(body(1))),
            change("stale", Some(body(1))),
            change("gone", None),
        ];
        let entries = [
            document("gone", body(2)),
            document("same", body(1)),
            document("stale", body(2)),
            document("unfed", body(3)),
        ];
        assert_eq!(feed_divergence(&feed, &entries), ["gone", "stale", "unfed"]);
        assert!(feed_divergence(&feed[..1], &entries[1..2]).is_empty());

        let violation = InvariantViolation::FeedDivergence {
            replica: 2,
            keys: vec!["stale".into()],
        };
        assert!(violation.to_string().contains("replica 2"));
    }

    #[test]
    fn replicas_that_wrote_and_merged_keep_a_consistent_feed() {
        let replicas = [Replica::new(0), Replica::new(1)];
        replicas[0].write_genesis().unwrap();
        replicas[1].receive(&replicas[0].sync_message(1)).unwrap();
        let mut rng = DeterministicRng::new(7);
        for round in 0..4 {
            for replica in &replicas {
                replica.write_random(round, 4, &mut rng).unwrap();
            }
        }
        replicas[0].receive(&replicas[1].sync_message(0)).unwrap();
        replicas[1].receive(&replicas[0].sync_message(1)).unwrap();

        let states = replicas
            .iter()
            .map(Replica::state)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let result = ConvergenceOracle::check_change_feed(&replicas, &states).unwrap();
        assert!(result.passed, "{:?}", result.violations);
    }

    #[test]
    fn converged_replicas_pass_every_check() {
        let replicas = [Replica::new(0), Replica::new(1)];
        replicas[0].write_genesis().unwrap();
        replicas[1].receive(&replicas[0].sync_message(1)).unwrap();
        let result = ConvergenceOracle::check_all(&replicas).unwrap();
        assert!(result.passed, "{:?}", result.violations);
    }
}
