use cairn_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use cairn_sim::network::FaultConfig;

#[test]
fn reliable_campaign_converges() {
    let config = CampaignConfig {
        seed_range: 0..10,
        fault: FaultConfig::reliable(),
        ..CampaignConfig::default()
    };
    let report = run_campaign(&config).expect("campaign runs");
    assert_eq!(report.seeds_run, 10);
    assert!(report.all_passed(), "{:?}", report.failures);
}

#[test]
fn faulty_campaign_converges() {
    let config = CampaignConfig {
        seed_range: 0..25,
        fault: FaultConfig {
            max_delay_rounds: 3,
            drop_rate_percent: 30,
            duplicate_rate_percent: 20,
            reorder_rate_percent: 30,
        },
        ..CampaignConfig::default()
    };
    let report = run_campaign(&config).expect("campaign runs");
    assert!(
        report.all_passed(),
        "{} failures, first at seed {:?}: {:?}",
        report.failures.len(),
        report.first_failure,
        report.failures.first()
    );
    assert!(report.interesting_states_reached > 0);
}

#[test]
fn single_replica_is_trivially_converged() {
    let config = CampaignConfig {
        seed_range: 0..3,
        replica_count: 1,
        ..CampaignConfig::default()
    };
    let report = run_campaign(&config).expect("campaign runs");
    assert_eq!(report.seeds_passed, 3);
    assert_eq!(report.interesting_states_reached, 0);
}

#[test]
fn replayed_seed_ends_on_one_shared_state() {
    let trace = replay_seed(3, &CampaignConfig::default()).expect("replay runs");
    assert!(trace.oracle.passed, "{:?}", trace.oracle.violations);
    let first = &trace.result.states[0];
    for state in &trace.result.states {
        assert_eq!(state.head, first.head);
        assert_eq!(state.entries, first.entries);
    }
    assert!(first.entries.iter().any(|doc| doc.key == "_genesis"));
}
