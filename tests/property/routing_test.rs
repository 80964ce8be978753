// tests/property/routing_test.rs

//! Routing determinism and atomic-reassignment properties (spec §8).

use bytes::Bytes;
use crc::{CRC_32_ISO_HDLC, Crc};
use proptest::prelude::*;
use shardproxy::core::cluster::SlotStatus;
use shardproxy::core::cluster::slot::{get_slot, hash_tag_or_key};
use shardproxy::core::routing::RoutingTable;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const SLOT_COUNT: u32 = 1024;

fn reference_slot(key: &[u8]) -> u32 {
    let crc = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    crc.checksum(key) % SLOT_COUNT
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    /// For any key, `get_slot` matches an independently computed
    /// `CRC32(hashtag_or_key(key)) mod SLOT_COUNT` -- the exact invariant
    /// the spec requires to stay aligned with the backend's own hashing.
    #[test]
    fn slot_matches_reference_crc32_for_any_key(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let key = Bytes::from(bytes);
        let expected = reference_slot(hash_tag_or_key(&key));
        prop_assert_eq!(get_slot(&key, SLOT_COUNT), expected);
    }

    /// Two keys sharing a non-empty `{...}` hash tag always land on the
    /// same slot, regardless of what surrounds the tag.
    #[test]
    fn keys_sharing_a_hash_tag_always_coalesce(
        tag in "[a-zA-Z0-9]{1,20}",
        prefix_a in "[a-zA-Z0-9]{0,10}",
        suffix_a in "[a-zA-Z0-9]{0,10}",
        prefix_b in "[a-zA-Z0-9]{0,10}",
        suffix_b in "[a-zA-Z0-9]{0,10}",
    ) {
        let key_a = Bytes::from(format!("{prefix_a}{{{tag}}}{suffix_a}"));
        let key_b = Bytes::from(format!("{prefix_b}{{{tag}}}{suffix_b}"));
        prop_assert_eq!(get_slot(&key_a, SLOT_COUNT), get_slot(&key_b, SLOT_COUNT));
    }
}

/// Atomic reassignment: while slot 42 is continuously toggled between two
/// groups, a concurrent reader must always observe a slot record whose
/// `group_id` and `status` came from the same write -- never a torn mix --
/// and the record settles on the final group once mutation stops.
#[test]
fn slot_42_reassignment_never_exposes_a_torn_record() {
    let table = Arc::new(RoutingTable::new(SLOT_COUNT));
    table.set_slot(42, 1, SlotStatus::Online, None).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let table = table.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut current = 1u32;
            for _ in 0..5000 {
                current = if current == 1 { 2 } else { 1 };
                table.set_slot(42, current, SlotStatus::Online, None).unwrap();
            }
            // Leave it deterministically on group 2 so the post-mutation
            // assertion below has a known value to check against.
            table.set_slot(42, 2, SlotStatus::Online, None).unwrap();
            stop.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let table = table.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let rec = table.slot(42).unwrap();
                    assert!(rec.group_id == 1 || rec.group_id == 2);
                    assert_eq!(rec.status, SlotStatus::Online);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(table.slot(42).unwrap().group_id, 2);
}
