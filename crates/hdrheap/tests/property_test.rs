//! Property-based tests for the header heap.
//!
//! Random operation sequences run against a heap and a plain model of what
//! each record should contain. Small segments and a low lost-space threshold
//! make demotion, chaining and coalescing happen often.

mod common;

use bytes::Bytes;
use common::{Record, aliased, copied};
use hdrheap::{HdrHeap, HeapConfig, ObjHandle, OverflowPolicy, StrValue};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    SetCopy(usize, Vec<u8>),
    SetAlias(usize, Vec<u8>),
    Clear(usize),
    Coalesce,
}

fn op_strategy(records: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..records, prop::collection::vec(any::<u8>(), 0..200))
            .prop_map(|(i, bytes)| Op::SetCopy(i, bytes)),
        2 => (0..records, prop::collection::vec(any::<u8>(), 1..300))
            .prop_map(|(i, bytes)| Op::SetAlias(i, bytes)),
        1 => (0..records).prop_map(Op::Clear),
        1 => Just(Op::Coalesce),
    ]
}

fn policy_strategy() -> impl Strategy<Value = OverflowPolicy> {
    prop_oneof![Just(OverflowPolicy::Coalesce), Just(OverflowPolicy::Chain)]
}

#[derive(Default)]
struct Expected {
    copied: Vec<u8>,
    aliased: Option<Bytes>,
}

fn check(heap: &HdrHeap, records: &[ObjHandle<Record>], model: &[Expected]) {
    heap.sanity_check_strs().unwrap();
    for (record, expected) in records.iter().zip(model) {
        let stored = heap.get(*record).unwrap();
        assert_eq!(heap.resolve(&stored.copied).unwrap(), &expected.copied[..]);
        match &expected.aliased {
            Some(bytes) => assert_eq!(stored.aliased.borrowed_ptr(), Some(bytes.as_ptr())),
            None => assert!(stored.aliased.is_empty()),
        }
    }
    let live: usize = model.iter().map(|e| e.copied.len()).sum();
    assert_eq!(heap.required_space_for_evacuation(), live);
}

#[test]
fn test_random_operations_match_model() {
    proptest!(|(
        segment in 16usize..128,
        policy in policy_strategy(),
        ops in prop::collection::vec(op_strategy(4), 1..60)
    )| {
        let config = HeapConfig::default()
            .with_str_heap_size(segment)
            .with_max_lost_string_space(256)
            .with_overflow_policy(policy);
        let mut heap = HdrHeap::with_config(config);
        let records: Vec<_> = (0..4).map(|_| heap.allocate_obj(Record::default())).collect();
        let mut model: Vec<Expected> = (0..4).map(|_| Expected::default()).collect();

        for op in ops {
            match op {
                Op::SetCopy(i, bytes) => {
                    heap.set_str(records[i], copied, StrValue::Copy(&bytes)).unwrap();
                    model[i].copied = bytes;
                }
                Op::SetAlias(i, bytes) => {
                    let bytes = Bytes::from(bytes);
                    heap.set_str(records[i], aliased, StrValue::Alias(bytes.clone())).unwrap();
                    model[i].aliased = Some(bytes);
                }
                Op::Clear(i) => {
                    heap.set_str(records[i], copied, StrValue::Copy(&[])).unwrap();
                    heap.set_str(records[i], aliased, StrValue::Copy(&[])).unwrap();
                    model[i] = Expected::default();
                }
                Op::Coalesce => heap.coalesce().unwrap(),
            }
            check(&heap, &records, &model);
        }
    });
}

#[test]
fn test_coalesce_capacity_excludes_aliases() {
    proptest!(|(copies in prop::collection::vec(1usize..500, 1..8), alias_len in 1usize..100_000)| {
        let mut heap = HdrHeap::with_config(HeapConfig::default().with_str_heap_size(8));
        for (i, len) in copies.iter().enumerate() {
            let record = heap.allocate_obj(Record::default());
            heap.set_str(record, copied, StrValue::Copy(&vec![i as u8; *len])).unwrap();
        }
        let holder = heap.allocate_obj(Record::default());
        heap.set_str(holder, aliased, StrValue::Alias(Bytes::from(vec![0xAA; alias_len]))).unwrap();

        heap.coalesce().unwrap();

        let live: usize = copies.iter().sum();
        let stats = heap.stats();
        assert_eq!(stats.str_capacity, 8usize.max(2 * live));
        assert_eq!(stats.str_used, live);
        assert_eq!(stats.aliased_str_bytes, alias_len);
    });
}

#[cfg(feature = "mem-arena")]
#[test]
fn test_arena_spans_never_overlap() {
    use hdrheap::MemArena;

    proptest!(|(sizes in prop::collection::vec(0usize..2000, 1..50), freeze_at in 0usize..50)| {
        let mut arena = MemArena::new(64);
        let mut spans = Vec::new();
        let mut before_freeze = None;

        for (i, size) in sizes.iter().enumerate() {
            if i == freeze_at {
                before_freeze = Some(arena.extent());
                arena.freeze(0);
            }
            spans.push(arena.alloc(*size));
        }
        arena.thaw();
        if let Some(extent) = before_freeze {
            assert!(arena.extent() >= extent);
        }

        let live: Vec<_> = spans.iter().filter(|s| arena.contains(s.as_ptr())).collect();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                assert!(a.is_empty() || b.is_empty() || !a.overlaps(b));
            }
        }
    });
}
