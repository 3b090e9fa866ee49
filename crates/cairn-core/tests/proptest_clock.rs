use cairn_core::clock::{EventFetcher, Head, advance, contains, find_common_ancestor};
use proptest::prelude::*;

use generators::*;

fn fold(dag: &Dag, order: &[usize]) -> Head {
    let events = EventFetcher::new(&dag.store);
    let mut head = Head::new();
    for &i in order {
        head = advance(&events, &head, &dag.links[i]).expect("advance succeeds");
    }
    Head::canonical(head.into_vec())
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn advance_is_idempotent(shape in arb_shape(16)) {
        let dag = Dag::build(&shape);
        let events = EventFetcher::new(&dag.store);
        let mut head = Head::new();
        for link in &dag.links {
            head = advance(&events, &head, link).unwrap();
            let again = advance(&events, &head, link).unwrap();
            prop_assert_eq!(&again, &head);
        }
    }

    #[test]
    fn delivery_order_does_not_matter((shape, order) in arb_shape_and_order(16)) {
        let dag = Dag::build(&shape);
        let in_order: Vec<usize> = (0..dag.len()).collect();
        prop_assert_eq!(fold(&dag, &order), fold(&dag, &in_order));
    }

    #[test]
    fn head_is_the_maximal_antichain((shape, order) in arb_shape_and_order(16)) {
        let dag = Dag::build(&shape);
        let head = fold(&dag, &order);
        let maximal = dag.maximal();
        prop_assert_eq!(head.as_slice(), maximal.as_slice());

        let events = EventFetcher::new(&dag.store);
        for a in &head {
            for b in &head {
                if a != b {
                    prop_assert!(!contains(&events, a, b).unwrap());
                }
            }
        }
    }

    #[test]
    fn contains_matches_reachability(shape in arb_shape(12)) {
        let dag = Dag::build(&shape);
        let events = EventFetcher::new(&dag.store);
        for a in 0..dag.len() {
            for b in 0..dag.len() {
                let expected = dag.descends(a, b);
                let actual = contains(&events, &dag.links[a], &dag.links[b]).unwrap();
                prop_assert_eq!(actual, expected, "contains({}, {})", a, b);
            }
        }
    }

    #[test]
    fn common_ancestor_is_shared(shape in arb_shape(12)) {
        let dag = Dag::build(&shape);
        let heads = dag.maximal();
        let events = EventFetcher::new(&dag.store);
        if let Ok(ancestor) = find_common_ancestor(&events, &heads) {
            for head in &heads {
                prop_assert!(contains(&events, head, &ancestor).unwrap());
            }
        }
    }
}
