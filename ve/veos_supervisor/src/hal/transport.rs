// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The real length-prefixed command socket to the supervisor daemon: a
//! 4-byte little-endian length, then that many request bytes; the reply is
//! framed the same way on the way back.

use parking_lot::Mutex;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use ve_hal::{CommandTransport, HalError};

/// Largest reply this client accepts, guarding against a misbehaving daemon
/// claiming an unreasonable length prefix.
const MAX_REPLY_LEN: u32 = 16 * 1024 * 1024;

pub struct UnixCommandTransport {
    stream: Mutex<UnixStream>,
}

impl UnixCommandTransport {
    pub fn connect(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self { stream: Mutex::new(UnixStream::connect(path)?) })
    }
}

impl CommandTransport for UnixCommandTransport {
    fn submit_and_await(&self, handle: u64, request: &[u8]) -> Result<Vec<u8>, HalError> {
        let mut stream = self.stream.lock();
        let mut framed = Vec::with_capacity(8 + request.len());
        framed.extend_from_slice(&handle.to_le_bytes());
        framed.extend_from_slice(&(request.len() as u32).to_le_bytes());
        framed.extend_from_slice(request);
        stream
            .write_all(&framed)
            .map_err(|e| HalError::Transport(format!("write failed: {e}")))?;

        let mut len_bytes = [0u8; 4];
        stream
            .read_exact(&mut len_bytes)
            .map_err(|e| HalError::Transport(format!("read length prefix failed: {e}")))?;
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_REPLY_LEN {
            return Err(HalError::Transport(format!("reply length {len} exceeds {MAX_REPLY_LEN}")));
        }
        let mut reply = vec![0u8; len as usize];
        stream
            .read_exact(&mut reply)
            .map_err(|e| HalError::Transport(format!("read reply body failed: {e}")))?;
        Ok(reply)
    }
}
