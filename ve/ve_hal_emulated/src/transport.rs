// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory stand-in for the length-prefixed command socket to the
//! supervisor daemon. Tests register a responder closure per handle; a
//! handle with no registered responder gets its request echoed back, which
//! is enough for round-trip plumbing tests that don't care about the
//! daemon's actual reply.

use parking_lot::Mutex;
use std::collections::HashMap;
use ve_hal::{CommandTransport, HalError};

type Responder = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, HalError> + Send + Sync>;

#[derive(Default)]
pub struct EmulatedCommandTransport {
    responders: Mutex<HashMap<u64, Responder>>,
}

impl EmulatedCommandTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_responder(&self, handle: u64, responder: impl Fn(&[u8]) -> Result<Vec<u8>, HalError> + Send + Sync + 'static) {
        self.responders.lock().insert(handle, Box::new(responder));
    }
}

impl CommandTransport for EmulatedCommandTransport {
    fn submit_and_await(&self, handle: u64, request: &[u8]) -> Result<Vec<u8>, HalError> {
        match self.responders.lock().get(&handle) {
            Some(responder) => responder(request),
            None => Ok(request.to_vec()),
        }
    }
}
