//! Tests for WriteBuffer overflow accounting

use sluice_event::Buffer;

use crate::WriteBuffer;

#[test]
fn test_unlimited_accepts_everything() {
    let buf = WriteBuffer::new(0);
    let result = buf.push(Buffer::from(vec![0u8; 1 << 20]));

    assert_eq!(result.accepted, 1 << 20);
    assert_eq!(result.discarded, 0);
    assert!(!result.first_overflow);
    assert!(!buf.is_overflowed());
    assert_eq!(buf.len(), 1 << 20);
}

#[test]
fn test_overflow_is_byte_granular() {
    let buf = WriteBuffer::new(1024);
    let result = buf.push(Buffer::from(vec![0u8; 4096]));

    // The bytes that fit are kept, the excess is tallied
    assert_eq!(result.accepted, 1024);
    assert_eq!(result.discarded, 3072);
    assert!(result.first_overflow);
    assert!(buf.is_overflowed());
    assert_eq!(buf.discarded_data_size(), 3072);
    assert_eq!(buf.len(), 1024);
}

#[test]
fn test_first_overflow_reported_once() {
    let buf = WriteBuffer::new(8);
    let first = buf.push(Buffer::from(vec![0u8; 16]));
    let second = buf.push(Buffer::from(vec![0u8; 16]));

    assert!(first.first_overflow);
    assert!(!second.first_overflow);
    assert_eq!(buf.discarded_data_size(), 8 + 16);
}

#[test]
fn test_discarded_accumulates_across_lifetime() {
    let buf = WriteBuffer::new(4);
    buf.push(Buffer::from(vec![0u8; 10]));
    buf.push(Buffer::from(vec![0u8; 10]));
    buf.push(Buffer::from(vec![0u8; 10]));

    // 6 + 10 + 10 dropped; 4 accepted on the first push
    assert_eq!(buf.discarded_data_size(), 26);
    assert_eq!(buf.len(), 4);
}

#[test]
fn test_pop_chunk_drains_in_order() {
    let buf = WriteBuffer::new(0);
    buf.push(Buffer::from(&b"hello "[..]));
    buf.push(Buffer::from(&b"world"[..]));

    let mut out = Vec::new();
    while let Some(chunk) = buf.pop_chunk() {
        out.extend_from_slice(&chunk);
    }
    assert_eq!(&out[..], b"hello world");
    assert!(buf.is_empty());
}

#[test]
fn test_space_frees_after_drain() {
    let buf = WriteBuffer::new(8);
    buf.push(Buffer::from(vec![1u8; 8]));
    assert!(buf.pop_chunk().is_some());

    // Buffer drained: new bytes fit again (overflow flag is sticky,
    // discard accounting unchanged)
    let result = buf.push(Buffer::from(vec![2u8; 8]));
    assert_eq!(result.accepted, 8);
    assert_eq!(result.discarded, 0);
}

#[test]
fn test_end_marks_ended() {
    let buf = WriteBuffer::new(0);
    assert!(!buf.is_ended());
    buf.end();
    assert!(buf.is_ended());
}
