#![no_main]

use cairn_core::kv::Shard;
use cairn_core::{Block, DocValue, Event, EventPayload, Link};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let block = Block::from_bytes(data.to_vec());

    // A decoded event re-encodes to the exact same bytes.
    if let Ok(event) = block.decode::<Event>() {
        let again = Block::encode(&event).expect("decoded event re-encodes");
        assert_eq!(again.bytes, data);
        let _ = cairn_core::event::decode(data);
    }
    if let Ok(payload) = block.decode::<EventPayload>() {
        let _ = payload.op.validate();
        let _ = payload.op.writes();
    }
    if let Ok(shard) = block.decode::<Shard>() {
        for window in shard.iter().collect::<Vec<_>>().windows(2) {
            assert!(window[0].0 < window[1].0, "decoded shard keys are sorted");
        }
    }
    if let Ok(value) = block.decode::<DocValue>() {
        let _ = value.is_deleted();
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Link::parse(text);
    }
});
