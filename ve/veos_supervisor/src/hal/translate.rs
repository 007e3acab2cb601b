// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Address translation against the supervisor daemon, over the same
//! length-prefixed command socket [`super::transport::UnixCommandTransport`]
//! implements.

use std::sync::Arc;
use ve_hal::{CommandTransport, HalError, Translate, Translation};

/// Wire opcode this client tags translation requests with. The daemon on
/// the other end of the socket dispatches on this byte before the
/// pid/addr/want_write payload that follows it.
const OP_TRANSLATE: u8 = 1;

pub struct DriverTranslate {
    transport: Arc<dyn CommandTransport>,
}

impl DriverTranslate {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self { transport }
    }
}

impl Translate for DriverTranslate {
    fn translate(&self, pid: i32, virt_addr: u64, want_write: bool) -> Result<Translation, HalError> {
        let mut request = Vec::with_capacity(1 + 4 + 8 + 1);
        request.push(OP_TRANSLATE);
        request.extend_from_slice(&pid.to_le_bytes());
        request.extend_from_slice(&virt_addr.to_le_bytes());
        request.push(want_write as u8);

        let reply = self.transport.submit_and_await(pid as u64, &request)?;
        if reply.len() != 18 {
            return Err(HalError::Transport(format!("translate reply had {} bytes, want 18", reply.len())));
        }
        let ok = reply[0] != 0;
        if !ok {
            return Err(HalError::Translation { addr: virt_addr, pid, want_write });
        }
        let phys_addr = u64::from_le_bytes(reply[1..9].try_into().unwrap());
        let page_size = u64::from_le_bytes(reply[9..17].try_into().unwrap());
        let writable = reply[17] != 0;
        Ok(Translation { phys_addr, page_size, writable })
    }
}
