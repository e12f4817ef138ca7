//! Tests for Buffer
//!
//! Covers push/shift accounting, chunk boundaries, and shallow cloning.

use bytes::Bytes;

use crate::Buffer;

#[test]
fn test_new_buffer_is_empty() {
    let buf = Buffer::new();
    assert!(buf.is_empty());
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.chunk_count(), 0);
}

#[test]
fn test_push_accumulates_length() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"hello"));
    buf.push(Bytes::from_static(b" world"));

    assert_eq!(buf.len(), 11);
    assert_eq!(buf.chunk_count(), 2);
    assert_eq!(&buf.to_bytes()[..], b"hello world");
}

#[test]
fn test_push_empty_chunk_is_dropped() {
    let mut buf = Buffer::new();
    buf.push(Bytes::new());
    assert!(buf.is_empty());
    assert_eq!(buf.chunk_count(), 0);
}

#[test]
fn test_shift_whole_chunks() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"abc"));
    buf.push(Bytes::from_static(b"def"));

    let head = buf.shift(3);
    assert_eq!(&head.to_bytes()[..], b"abc");
    assert_eq!(&buf.to_bytes()[..], b"def");
    assert_eq!(buf.len(), 3);
}

#[test]
fn test_shift_splits_chunk() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"abcdef"));

    let head = buf.shift(2);
    assert_eq!(&head.to_bytes()[..], b"ab");
    assert_eq!(&buf.to_bytes()[..], b"cdef");
    assert_eq!(buf.len(), 4);
    assert_eq!(head.len(), 2);
}

#[test]
fn test_shift_across_chunk_boundary() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"abc"));
    buf.push(Bytes::from_static(b"def"));
    buf.push(Bytes::from_static(b"ghi"));

    let head = buf.shift(5);
    assert_eq!(&head.to_bytes()[..], b"abcde");
    assert_eq!(&buf.to_bytes()[..], b"fghi");
}

#[test]
fn test_shift_more_than_available() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"abc"));

    let head = buf.shift(100);
    assert_eq!(&head.to_bytes()[..], b"abc");
    assert!(buf.is_empty());
}

#[test]
fn test_shift_zero() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"abc"));

    let head = buf.shift(0);
    assert!(head.is_empty());
    assert_eq!(buf.len(), 3);
}

#[test]
fn test_clone_is_shallow() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"shared"));

    let clone = buf.clone();
    let a = buf.chunks().next().unwrap();
    let b = clone.chunks().next().unwrap();

    // Same storage, not a copy
    assert_eq!(a.as_ptr(), b.as_ptr());
}

#[test]
fn test_push_buffer() {
    let mut a = Buffer::new();
    a.push(Bytes::from_static(b"one"));

    let mut b = Buffer::new();
    b.push(Bytes::from_static(b"two"));
    b.push(Bytes::from_static(b"three"));

    a.push_buffer(&b);
    assert_eq!(a.len(), 11);
    assert_eq!(&a.to_bytes()[..], b"onetwothree");
    // Source unchanged
    assert_eq!(b.len(), 8);
}

#[test]
fn test_take_leaves_empty() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"abc"));

    let taken = buf.take();
    assert_eq!(taken.len(), 3);
    assert!(buf.is_empty());
}

#[test]
fn test_clear() {
    let mut buf = Buffer::new();
    buf.push(Bytes::from_static(b"abc"));
    buf.clear();
    assert!(buf.is_empty());
    assert_eq!(buf.chunk_count(), 0);
}

#[test]
fn test_from_slice_and_vec() {
    let a = Buffer::from(&b"abc"[..]);
    assert_eq!(a.len(), 3);

    let b = Buffer::from(vec![1u8, 2, 3, 4]);
    assert_eq!(b.len(), 4);
}
