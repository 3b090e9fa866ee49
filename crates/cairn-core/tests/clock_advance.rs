use cairn_core::clock::{EventFetcher, Head, advance, vis};
use cairn_core::{EventBlock, Link, MemoryBlockstore};

struct Clock {
    store: MemoryBlockstore,
    counter: u32,
}

impl Clock {
    fn new() -> Self {
        Self {
            store: MemoryBlockstore::new(),
            counter: 0,
        }
    }

    fn event(&mut self, parents: &[Link]) -> Link {
        self.counter += 1;
        let data = Link::digest(format!("random-data-{}", self.counter).as_bytes());
        let event = EventBlock::create(data, parents.to_vec()).expect("event encodes");
        self.store.put(event.to_block());
        event.link
    }

    fn advance(&self, head: &Head, event: &Link) -> Head {
        let events = EventFetcher::new(&self.store);
        let next = advance(&events, head, event).expect("advance succeeds");
        vis(&events, &next).expect("head renders");
        next
    }
}

fn links(head: &Head) -> Vec<Link> {
    head.as_slice().to_vec()
}

#[test]
fn create_a_new_clock() {
    let mut clock = Clock::new();
    let event = clock.event(&[]);
    let head = clock.advance(&Head::new(), &event);
    assert_eq!(links(&head), vec![event]);
}

#[test]
fn add_an_event() {
    let mut clock = Clock::new();
    let root = clock.event(&[]);
    let head = Head::from_links(vec![root.clone()]);
    let event = clock.event(&[root]);
    let head = clock.advance(&head, &event);
    assert_eq!(links(&head), vec![event]);
}

#[test]
fn add_two_events_with_shared_parents() {
    let mut clock = Clock::new();
    let root = clock.event(&[]);
    let parents = vec![root];
    let head = Head::from_links(parents.clone());

    let event0 = clock.event(&parents);
    let head = clock.advance(&head, &event0);
    let event1 = clock.event(&parents);
    let head = clock.advance(&head, &event1);

    assert_eq!(links(&head), vec![event0, event1]);
}

#[test]
fn add_two_events_with_some_shared_parents() {
    let mut clock = Clock::new();
    let root = clock.event(&[]);
    let parents0 = vec![root];
    let mut head = Head::from_links(parents0.clone());

    let event0 = clock.event(&parents0);
    head = clock.advance(&head, &event0);
    let event1 = clock.event(&parents0);
    head = clock.advance(&head, &event1);
    let event2 = clock.event(&parents0);
    head = clock.advance(&head, &event2);

    let event3 = clock.event(&[event0, event1]);
    head = clock.advance(&head, &event3);
    let event4 = clock.event(&[event2]);
    head = clock.advance(&head, &event4);

    assert_eq!(links(&head), vec![event3, event4]);
}

#[test]
fn converge_when_multi_root() {
    let mut clock = Clock::new();
    let root = clock.event(&[]);
    let parents0 = vec![root];
    let mut head = Head::from_links(parents0.clone());

    for _ in 0..2 {
        let event = clock.event(&parents0);
        head = clock.advance(&head, &event);
    }
    let parents1 = links(&head);
    assert_eq!(parents1.len(), 2);

    for _ in 0..3 {
        let event = clock.event(&parents1);
        head = clock.advance(&head, &event);
    }
    let parents2 = links(&head);
    assert_eq!(parents2.len(), 3);

    let event5 = clock.event(&parents2);
    head = clock.advance(&head, &event5);
    assert_eq!(links(&head), vec![event5]);
}

#[test]
fn add_an_old_event() {
    let mut clock = Clock::new();
    let root = clock.event(&[]);
    let parents0 = vec![root];
    let mut head = Head::from_links(parents0.clone());

    for _ in 0..2 {
        let event = clock.event(&parents0);
        head = clock.advance(&head, &event);
    }
    let parents1 = links(&head);
    for _ in 0..3 {
        let event = clock.event(&parents1);
        head = clock.advance(&head, &event);
    }
    let parents2 = links(&head);
    let event5 = clock.event(&parents2);
    head = clock.advance(&head, &event5);

    // A late sibling of the first generation.
    let event6 = clock.event(&parents0);
    head = clock.advance(&head, &event6);

    assert_eq!(links(&head), vec![event5, event6]);
}

#[test]
fn add_an_event_with_missing_parents() {
    let mut clock = Clock::new();
    let root = clock.event(&[]);
    let head = Head::from_links(vec![root.clone()]);

    // event0 is stored but never advanced into the head.
    let event0 = clock.event(&[root]);
    let event1 = clock.event(&[event0]);
    let head = clock.advance(&head, &event1);

    assert_eq!(links(&head), vec![event1]);
}

#[test]
fn advancing_an_ancestor_leaves_the_head_alone() {
    let mut clock = Clock::new();
    let root = clock.event(&[]);
    let child = clock.event(&[root.clone()]);
    let head = Head::from_links(vec![child.clone()]);

    assert_eq!(clock.advance(&head, &root), head);
    assert_eq!(clock.advance(&head, &child), head);
}

#[test]
fn disjoint_roots_grow_the_head() {
    let mut clock = Clock::new();
    let a = clock.event(&[]);
    let b = clock.event(&[]);
    let head = clock.advance(&Head::from_links(vec![a.clone()]), &b);
    assert_eq!(links(&head), vec![a, b]);
}
