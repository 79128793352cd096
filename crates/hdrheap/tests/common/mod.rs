// Shared fixtures for the heap integration tests.

#![allow(dead_code)]

use hdrheap::{HdrHeap, HeapConfig, ObjHandle, OverflowPolicy, Relocatable, StrRef, StrValue};

/// Test object with one copied and one aliased string field.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub copied: StrRef,
    pub aliased: StrRef,
}

impl Relocatable for Record {
    fn visit_strs(&self, visitor: &mut dyn FnMut(&StrRef)) {
        visitor(&self.copied);
        visitor(&self.aliased);
    }

    fn visit_strs_mut(&mut self, visitor: &mut dyn FnMut(&mut StrRef)) {
        visitor(&mut self.copied);
        visitor(&mut self.aliased);
    }
}

hdrheap::impl_heap_object!(Record);

pub fn copied(record: &mut Record) -> &mut StrRef {
    &mut record.copied
}

pub fn aliased(record: &mut Record) -> &mut StrRef {
    &mut record.aliased
}

/// Heap whose first string segment holds `size` bytes.
pub fn heap_with_segment(size: usize) -> HdrHeap {
    HdrHeap::with_config(HeapConfig::default().with_str_heap_size(size))
}

/// Like [`heap_with_segment`], chaining instead of coalescing.
pub fn chaining_heap(size: usize) -> HdrHeap {
    HdrHeap::with_config(
        HeapConfig::default()
            .with_str_heap_size(size)
            .with_overflow_policy(OverflowPolicy::Chain),
    )
}

/// Deterministic bytes distinct per `seed`.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8) | 1).collect()
}

/// Stores a record whose copied field holds `bytes`.
pub fn record_with_copy(heap: &mut HdrHeap, bytes: &[u8]) -> ObjHandle<Record> {
    let record = heap.allocate_obj(Record::default());
    heap.set_str(record, copied, StrValue::Copy(bytes))
        .expect("set copied field");
    record
}

/// Bytes of the record's copied field.
pub fn copied_bytes(heap: &HdrHeap, record: ObjHandle<Record>) -> Vec<u8> {
    let field = heap.get(record).expect("live record").copied.clone();
    heap.resolve(&field).expect("copied field resolves").to_vec()
}
