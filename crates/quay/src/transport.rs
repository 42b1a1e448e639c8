// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Transport seam: the runtime frames messages, the transport moves bytes.
//!
//! The runtime owns framing and correlation; a transport only has to
//! deliver whole frames. Inbound bytes are pushed into the runtime by
//! whatever owns the transport (`Client::handle_frame`,
//! `Server::handle_frame`), so the trait has a send side only.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Outbound half of a connection
pub trait Transport: Send + Sync {
    /// Deliver one complete frame. A frame is never split or merged.
    fn send(&self, frame: &[u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, frame: &[u8]) -> Result<()> {
        (**self).send(frame)
    }
}

/// In-process transport that queues frames for the test or demo harness
/// to drain and feed to the other side.
#[derive(Default)]
pub struct LoopbackTransport {
    queue: Mutex<VecDeque<Vec<u8>>>,
    refuse: Mutex<bool>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail, simulating a dead link
    pub fn refuse_sends(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    /// Remove the oldest queued frame
    pub fn take(&self) -> Option<Vec<u8>> {
        self.queue.lock().pop_front()
    }

    /// Remove all queued frames
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.queue.lock().drain(..).collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, frame: &[u8]) -> Result<()> {
        if *self.refuse.lock() {
            return Err(Error::SendFailed("loopback link refused".into()));
        }
        self.queue.lock().push_back(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_come_out_in_send_order() {
        let transport = LoopbackTransport::new();
        transport.send(&[1]).expect("send");
        transport.send(&[2, 2]).expect("send");
        assert_eq!(transport.queued(), 2);
        assert_eq!(transport.take().expect("first"), vec![1]);
        assert_eq!(transport.take().expect("second"), vec![2, 2]);
        assert!(transport.take().is_none());
    }

    #[test]
    fn refused_send_reports_failure() {
        let transport = LoopbackTransport::new();
        transport.refuse_sends(true);
        assert!(matches!(
            transport.send(&[1]).unwrap_err(),
            Error::SendFailed(_)
        ));
        transport.refuse_sends(false);
        transport.send(&[1]).expect("send after recovery");
    }
}
