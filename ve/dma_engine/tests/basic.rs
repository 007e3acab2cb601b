// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use dma_engine::{AggregateStatus, DmaError, Engine, Request};
use std::sync::Arc;
use std::time::Duration;
use ve_hal::{AddrKind, Address};
use ve_hal_emulated::{EmulatedRegisterIo, EmulatedTranslate};

fn open_engine(num_desc: usize) -> Arc<Engine> {
    let (engine, _regs) = open_engine_with_regs(num_desc);
    engine
}

fn open_engine_with_regs(num_desc: usize) -> (Arc<Engine>, Arc<EmulatedRegisterIo>) {
    let regs = EmulatedRegisterIo::new(num_desc);
    let translate = Arc::new(EmulatedTranslate::new());
    let engine = Engine::open(regs.clone(), translate, num_desc);
    (engine, regs)
}

fn host_addr(ptr: u64) -> Address {
    Address::virt(AddrKind::HostVirt, std::process::id() as i32, ptr)
}

#[test]
fn single_aligned_transfer_completes() {
    let engine = open_engine(4);
    // Heap-allocated so the pointer is aligned for the direct-submit path,
    // which (unlike `send_bytes`/`recv_bytes`) does not bounce-buffer
    // around misaligned addresses.
    let src: Vec<u8> = b"0123456789abcdef".to_vec();
    let mut dst = vec![0u8; 16];

    let req = Request::new(
        host_addr(src.as_ptr() as u64),
        host_addr(dst.as_mut_ptr() as u64),
        16,
    );
    let list = engine.submit(req).expect("submit should succeed");
    assert_eq!(list.wait(), AggregateStatus::Ok);
    assert_eq!(dst, src);
}

#[test]
fn more_requests_than_slots_queue_and_drain() {
    let engine = open_engine(2);
    let mut buffers: Vec<(Vec<u8>, Vec<u8>)> = (0..6u8).map(|i| (vec![i; 8], vec![0u8; 8])).collect();
    let mut lists = Vec::new();
    for (src, dst) in &mut buffers {
        let req = Request::new(host_addr(src.as_ptr() as u64), host_addr(dst.as_mut_ptr() as u64), 8);
        lists.push(engine.submit(req).expect("submit should succeed"));
    }
    for (list, (src, dst)) in lists.iter().zip(buffers.iter()) {
        assert_eq!(list.wait(), AggregateStatus::Ok);
        assert_eq!(dst, src);
    }
}

#[test]
fn timed_wait_reports_completion_before_deadline() {
    let engine = open_engine(4);
    let src = vec![7u8; 8];
    let mut dst = vec![0u8; 8];
    let req = Request::new(host_addr(src.as_ptr() as u64), host_addr(dst.as_mut_ptr() as u64), 8);
    let list = engine.submit(req).expect("submit should succeed");
    let status = list
        .timed_wait(Duration::from_secs(5))
        .expect("transfer should finish well within the deadline");
    assert_eq!(status, AggregateStatus::Ok);
}

#[test]
fn empty_request_is_rejected() {
    let engine = open_engine(2);
    let req = Request::new(host_addr(0x1000), host_addr(0x2000), 0);
    assert!(matches!(engine.submit(req), Err(DmaError::EmptyRequest)));
}

#[test]
fn unaligned_length_is_rejected() {
    let engine = open_engine(2);
    let req = Request::new(host_addr(0x1000), host_addr(0x2000), 3);
    assert!(matches!(engine.submit(req), Err(DmaError::LengthUnaligned(3))));
}

#[test]
fn register_physical_destination_is_read_only() {
    let engine = open_engine(2);
    let req = Request::new(host_addr(0x1000), Address::phys(AddrKind::VaRegPhys, 0x2000), 8);
    assert!(matches!(engine.submit(req), Err(DmaError::ReadOnly(_))));
}

#[test]
fn terminate_cancels_in_flight_request() {
    let (engine, regs) = open_engine_with_regs(1);
    // Pausing the emulated hardware keeps the only slot occupied, so the
    // second request is guaranteed to still be sitting in the wait queue
    // when we terminate it, instead of racing the background retirement
    // thread.
    regs.pause();
    let src1 = vec![1u8; 8];
    let mut dst1 = vec![0u8; 8];
    let req1 = Request::new(host_addr(src1.as_ptr() as u64), host_addr(dst1.as_mut_ptr() as u64), 8);
    let list1 = engine.submit(req1).expect("submit should succeed");

    let src2 = vec![2u8; 8];
    let mut dst2 = vec![0u8; 8];
    let req2 = Request::new(host_addr(src2.as_ptr() as u64), host_addr(dst2.as_mut_ptr() as u64), 8);
    let list2 = engine.submit(req2).expect("submit should succeed");
    list2.terminate();
    assert_eq!(list2.test(), AggregateStatus::Canceled);

    regs.resume();
    assert_eq!(list1.wait(), AggregateStatus::Ok);
}

#[test]
fn send_and_recv_bytes_round_trip_unaligned() {
    let engine = open_engine(4);
    // 11 bytes: neither the length nor (likely) the backing addresses are
    // ALIGN-aligned, forcing send_bytes/recv_bytes through the bounce path.
    let data: Vec<u8> = (1u8..=11).collect();
    let mut scratch = vec![0u8; 64];
    let dst = host_addr(scratch.as_mut_ptr() as u64);
    engine.send_bytes(&data, dst).expect("send_bytes should succeed");

    let mut out = vec![0u8; data.len()];
    engine.recv_bytes(dst, &mut out).expect("recv_bytes should succeed");
    assert_eq!(out, data);
}

#[test]
fn recv_string_stops_at_nul() {
    let engine = open_engine(4);
    let mut backing = vec![0u8; 64];
    backing[..5].copy_from_slice(b"hello");
    backing[5] = 0;
    let src = host_addr(backing.as_mut_ptr() as u64);

    let mut out = vec![0u8; 32];
    let len = engine.recv_string(src, &mut out).expect("string should be found");
    assert_eq!(len, 5);
    assert_eq!(&out[..5], b"hello");
}

#[test]
fn recv_string_reports_oversize_without_terminator() {
    let engine = open_engine(4);
    let mut backing = vec![b'x'; 256];
    let src = host_addr(backing.as_mut_ptr() as u64);

    let mut out = vec![0u8; 16];
    let err = engine.recv_string(src, &mut out).expect_err("no NUL within the buffer");
    assert!(matches!(err, DmaError::Oversize { .. }));
}
