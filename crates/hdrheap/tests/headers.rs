//! URL and MIME header flows across heaps: copying objects between heaps,
//! inheriting string segments, read-only sharing and clone-then-mutate.

#![cfg(feature = "headers")]

use bytes::Bytes;
use hdrheap::mime::{
    field_attach, field_delete, field_find, field_value_get, field_value_set, mime_hdr_create,
    mime_hdr_print,
};
use hdrheap::url::{url_create, url_get, url_set, url_string};
use hdrheap::{Error, HdrHeap, HeapConfig, ObjHandle, ObjKind, UrlComponent, UrlImpl, Violation};
use std::sync::Arc;
use std::thread;

fn request_url(heap: &mut HdrHeap) -> ObjHandle<UrlImpl> {
    let url = url_create(heap);
    url_set(heap, url, UrlComponent::Scheme, "https".into()).unwrap();
    url_set(heap, url, UrlComponent::Host, "cache.example.com".into()).unwrap();
    url_set(heap, url, UrlComponent::Path, "images/logo.png".into()).unwrap();
    url_set(heap, url, UrlComponent::Query, "v=3".into()).unwrap();
    url
}

const REQUEST_URL: &str = "https://cache.example.com/images/logo.png?v=3";

#[test]
fn test_copied_url_outlives_source_heap() {
    let mut source = HdrHeap::new();
    let url = request_url(&mut source);

    let mut target = HdrHeap::new();
    let copy = target.copy_obj_from(&source, url).unwrap();
    assert!(target.stats().ronly_slots_used >= 1);
    drop(source);

    assert_eq!(url_string(&target, copy).unwrap(), REQUEST_URL);
    target.sanity_check_strs().unwrap();
}

#[test]
fn test_inherit_into_full_heap_coalesces() {
    let mut target = HdrHeap::with_config(HeapConfig::default().with_str_heap_size(16));
    let own = url_create(&mut target);
    for (component, len) in [
        (UrlComponent::User, 16),
        (UrlComponent::Password, 32),
        (UrlComponent::Host, 64),
        (UrlComponent::Path, 128),
    ] {
        url_set(&mut target, own, component, "x".repeat(len).as_str().into()).unwrap();
    }
    assert_eq!(target.stats().ronly_slots_used, hdrheap::RONLY_HEAPS);

    let mut source = HdrHeap::new();
    let url = request_url(&mut source);
    let copy = target.copy_obj_from(&source, url).unwrap();
    drop(source);

    let stats = target.stats();
    assert_eq!(stats.coalesces, 1);
    assert_eq!(stats.str_segments, 1);
    assert_eq!(url_string(&target, copy).unwrap(), REQUEST_URL);
    assert_eq!(url_get(&target, own, UrlComponent::Host).unwrap(), "x".repeat(64).as_bytes());
    target.sanity_check_strs().unwrap();
}

#[test]
fn test_inherit_twice_reuses_slot() {
    let mut source = HdrHeap::new();
    let first = request_url(&mut source);
    source.make_read_only();

    let mut target = HdrHeap::new();
    target.copy_obj_from(&source, first).unwrap();
    target.copy_obj_from(&source, first).unwrap();

    assert_eq!(target.stats().ronly_slots_used, 1);
    assert_eq!(target.stats().coalesces, 0);
}

#[test]
fn test_inherit_own_segment_back_with_full_slots() {
    let mut origin = HdrHeap::new();
    let own = request_url(&mut origin);

    let mut relay = HdrHeap::new();
    relay.copy_obj_from(&origin, own).unwrap();

    for _ in 0..hdrheap::RONLY_HEAPS {
        let mut other = HdrHeap::new();
        let url = request_url(&mut other);
        origin.copy_obj_from(&other, url).unwrap();
    }
    assert_eq!(origin.stats().ronly_slots_used, hdrheap::RONLY_HEAPS);

    // The only segment coming back is origin's own read-write segment.
    origin.inherit_string_heaps(&relay).unwrap();

    let stats = origin.stats();
    assert_eq!(stats.coalesces, 0);
    assert_eq!(stats.str_segments, hdrheap::RONLY_HEAPS + 1);
    assert_eq!(url_string(&origin, own).unwrap(), REQUEST_URL);
    origin.sanity_check_strs().unwrap();
}

#[test]
fn test_read_only_heap_shared_across_threads() {
    let mut heap = HdrHeap::new();
    let hdr = mime_hdr_create(&mut heap);
    field_attach(&mut heap, hdr, b"Content-Type", "text/html".into()).unwrap();
    field_attach(&mut heap, hdr, b"Cache-Control", "max-age=60".into()).unwrap();
    heap.make_read_only();

    let shared = Arc::new(heap);
    let expected = "Content-Type: text/html\r\nCache-Control: max-age=60\r\n";
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let heap = Arc::clone(&shared);
            thread::spawn(move || mime_hdr_print(&heap, hdr).unwrap())
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.join().unwrap(), expected);
    }
}

#[test]
fn test_clone_then_mutate_leaves_original_intact() {
    let mut heap = HdrHeap::new();
    let hdr = mime_hdr_create(&mut heap);
    field_attach(&mut heap, hdr, b"Age", "0".into()).unwrap();
    field_attach(&mut heap, hdr, b"Via", "1.1 edge".into()).unwrap();
    heap.make_read_only();
    let cached = Arc::new(heap);

    let mut response = cached.clone_for_write();
    field_value_set(&mut response, hdr, b"age", "42".into()).unwrap();
    field_delete(&mut response, hdr, b"via").unwrap();
    field_attach(&mut response, hdr, b"X-Cache", Bytes::from_static(b"HIT").into()).unwrap();

    assert_eq!(mime_hdr_print(&cached, hdr).unwrap(), "Age: 0\r\nVia: 1.1 edge\r\n");
    assert_eq!(mime_hdr_print(&response, hdr).unwrap(), "Age: 42\r\nX-Cache: HIT\r\n");

    assert!(matches!(
        field_value_set(&mut Arc::try_unwrap(cached).unwrap(), hdr, b"Age", "1".into()),
        Err(Error::InvariantViolation(Violation::ReadOnlyHeap))
    ));
}

#[test]
fn test_original_keeps_writing_after_clone() {
    let mut heap = HdrHeap::new();
    let hdr = mime_hdr_create(&mut heap);
    field_attach(&mut heap, hdr, b"Host", "a.example".into()).unwrap();

    let snapshot = heap.clone_for_write();
    field_attach(&mut heap, hdr, b"Accept", "*/*".into()).unwrap();

    assert_eq!(field_find(&snapshot, hdr, b"accept").unwrap(), None);
    assert_eq!(field_value_get(&heap, hdr, b"accept").unwrap(), Some(&b"*/*"[..]));
    assert_eq!(field_value_get(&snapshot, hdr, b"host").unwrap(), Some(&b"a.example"[..]));
    assert!(heap.stats().demotions >= 1);
    heap.sanity_check_strs().unwrap();
    snapshot.sanity_check_strs().unwrap();
}

#[test]
fn test_objects_report_kinds() {
    let mut heap = HdrHeap::new();
    request_url(&mut heap);
    mime_hdr_create(&mut heap);

    let kinds: Vec<ObjKind> = heap.objects().map(|obj| obj.kind()).collect();
    assert_eq!(kinds, [ObjKind::Url, ObjKind::MimeHeader]);
    heap.dump();
}

#[test]
fn test_foreign_handle_rejected() {
    let mut first = HdrHeap::new();
    let second = HdrHeap::new();
    let url = request_url(&mut first);

    assert!(matches!(
        url_get(&second, url, UrlComponent::Host),
        Err(Error::InvariantViolation(Violation::ForeignHandle { .. }))
    ));
}
