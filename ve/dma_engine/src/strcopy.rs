// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte- and string-oriented transfers layered on top of [`Engine::submit`].
//!
//! The ring only moves [`ALIGN`]-aligned addresses and lengths. A caller's
//! buffer rarely starts on an 8-byte boundary, so `send_bytes`/`recv_bytes`
//! round the transfer out to the enclosing aligned window, bounce through a
//! scratch buffer, and copy the caller's exact byte range into or out of it.
//! A write to a misaligned window first reads the window back so the bytes
//! outside the caller's range are preserved instead of zeroed.

use crate::engine::Engine;
use crate::reqlist::AggregateStatus;
use crate::{DmaError, Request, ALIGN};
use std::sync::Arc;
use ve_hal::{AddrKind, Address};

/// Smallest aligned window covering `[addr, addr + len)`, and how far into
/// that window the caller's range actually starts.
fn aligned_window(addr: u64, len: u64) -> (u64, usize, u64) {
    let aligned_addr = addr - (addr % ALIGN);
    let front_pad = (addr - aligned_addr) as usize;
    let end = addr + len;
    let aligned_end = end + ((ALIGN - (end % ALIGN)) % ALIGN);
    (aligned_addr, front_pad, aligned_end - aligned_addr)
}

fn status_to_result(status: AggregateStatus) -> Result<(), DmaError> {
    match status {
        AggregateStatus::Ok => Ok(()),
        AggregateStatus::Error => Err(DmaError::HardwareError),
        AggregateStatus::Canceled => Err(DmaError::Terminated),
        AggregateStatus::NotFinished => unreachable!("ReqList::wait only returns terminal statuses"),
    }
}

fn local_buffer(addr: u64) -> Address {
    Address::virt(AddrKind::HostVirt, std::process::id() as i32, addr)
}

impl Engine {
    /// Reads `buf.len()` bytes starting at `src` into `buf`.
    pub fn recv_bytes(self: &Arc<Self>, src: Address, buf: &mut [u8]) -> Result<(), DmaError> {
        if buf.is_empty() {
            return Ok(());
        }
        let len = buf.len() as u64;
        let buf_addr = buf.as_mut_ptr() as u64;
        if src.addr % ALIGN == 0 && len % ALIGN == 0 && buf_addr % ALIGN == 0 {
            let dst = local_buffer(buf_addr);
            let list = self.submit(Request::new(src, dst, len))?;
            status_to_result(list.wait())
        } else {
            let (aligned_addr, front_pad, aligned_len) = aligned_window(src.addr, len);
            let mut scratch = vec![0u8; aligned_len as usize];
            let window_src = Address { addr: aligned_addr, ..src };
            let dst = local_buffer(scratch.as_mut_ptr() as u64);
            let list = self.submit(Request::new(window_src, dst, aligned_len))?;
            status_to_result(list.wait())?;
            buf.copy_from_slice(&scratch[front_pad..front_pad + buf.len()]);
            Ok(())
        }
    }

    /// Writes all of `data` starting at `dst`.
    pub fn send_bytes(self: &Arc<Self>, data: &[u8], dst: Address) -> Result<(), DmaError> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len() as u64;
        let data_addr = data.as_ptr() as u64;
        if dst.addr % ALIGN == 0 && len % ALIGN == 0 && data_addr % ALIGN == 0 {
            let src = local_buffer(data_addr);
            let list = self.submit(Request::new(src, dst, len))?;
            status_to_result(list.wait())
        } else {
            let (aligned_addr, front_pad, aligned_len) = aligned_window(dst.addr, len);
            let mut scratch = vec![0u8; aligned_len as usize];
            let window = Address { addr: aligned_addr, ..dst };

            let read_dst = local_buffer(scratch.as_mut_ptr() as u64);
            let list = self.submit(Request::new(window, read_dst, aligned_len))?;
            status_to_result(list.wait())?;

            scratch[front_pad..front_pad + data.len()].copy_from_slice(data);

            let write_src = local_buffer(scratch.as_ptr() as u64);
            let list = self.submit(Request::new(write_src, window, aligned_len))?;
            status_to_result(list.wait())
        }
    }

    /// Reads a NUL-terminated string starting at `src` into `buf`, returning
    /// the string's length (excluding the terminator).
    ///
    /// Scans in fixed-size windows rather than pulling `buf.len()` bytes up
    /// front, so a short string does not cost a transfer sized to the whole
    /// buffer.
    pub fn recv_string(self: &Arc<Self>, src: Address, buf: &mut [u8]) -> Result<usize, DmaError> {
        const WINDOW: usize = 64;
        if buf.is_empty() {
            return Err(DmaError::NullNotFound(0));
        }
        let mut scanned = 0usize;
        while scanned < buf.len() {
            let end = (scanned + WINDOW).min(buf.len());
            let chunk_src = Address {
                addr: src.addr + scanned as u64,
                ..src
            };
            self.recv_bytes(chunk_src, &mut buf[scanned..end])?;
            if let Some(pos) = buf[scanned..end].iter().position(|&b| b == 0) {
                return Ok(scanned + pos);
            }
            scanned = end;
        }
        Err(DmaError::Oversize {
            wanted: buf.len() + 1,
            available: buf.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_window_covers_unaligned_range() {
        let (addr, front_pad, len) = aligned_window(3, 10);
        assert_eq!(addr, 0);
        assert_eq!(front_pad, 3);
        assert_eq!(len, 16);
        assert!(addr % ALIGN == 0);
        assert!(len % ALIGN == 0);
    }

    #[test]
    fn aligned_window_noop_when_already_aligned() {
        let (addr, front_pad, len) = aligned_window(8, 16);
        assert_eq!(addr, 8);
        assert_eq!(front_pad, 0);
        assert_eq!(len, 16);
    }
}
