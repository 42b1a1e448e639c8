// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Client runtime: correlation of synchronous calls, fire-and-forget
//! posting, and event delivery.
//!
//! Every outbound call gets a fresh correlation token. Synchronous calls
//! park a oneshot sender in the pending table; the receive path removes
//! the entry and completes it when the matching response arrives. The
//! table removal is the commit point: exactly one of the response path
//! and the timeout path wins the entry, so a call completes exactly once
//! however the race falls.
//!
//! Recently completed tokens are remembered in a bounded window so a
//! straggler response can be told apart from one that was never asked
//! for ([`Error::DuplicateResponse`] vs [`Error::OrphanedResponse`]).

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result, Status};
use crate::registry::ActionRegistry;
use crate::schema::{CONTROL_LIST_PROTOCOLS, CONTROL_PROTOCOL_ID, CONTROL_SUBSCRIBE, CONTROL_UNSUBSCRIBE};
use crate::shm::{ShmPin, ShmRegistry};
use crate::transport::Transport;
use crate::wire::{Message, Param, DEFAULT_MAX_MESSAGE_SIZE};

/// Client tuning knobs
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline applied by [`Client::invoke`]
    pub default_timeout: Duration,
    /// Inbound frame size cap
    pub max_message_size: u32,
    /// How many completed correlation tokens to remember for duplicate
    /// detection
    pub completed_window: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            completed_window: 256,
        }
    }
}

enum Completion {
    Response(Message),
    Failed(Error),
}

/// One side of a connection that issues calls and receives events
pub struct Client {
    transport: Arc<dyn Transport>,
    registry: Arc<ActionRegistry>,
    shm: Option<Arc<ShmRegistry>>,
    pending: DashMap<u32, oneshot::Sender<Completion>>,
    completed: Mutex<LruCache<u32, ()>>,
    next_id: AtomicU32,
    lost: AtomicBool,
    shut_down: AtomicBool,
    config: ClientConfig,
}

impl Client {
    /// `registry` carries the event handlers this client subscribes to;
    /// a client that consumes no events may pass an empty registry.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ActionRegistry>,
        config: ClientConfig,
    ) -> Self {
        let window = NonZeroUsize::new(config.completed_window.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            transport,
            registry,
            shm: None,
            pending: DashMap::new(),
            completed: Mutex::new(LruCache::new(window)),
            next_id: AtomicU32::new(1),
            lost: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            config,
        }
    }

    /// Attach a shared-memory registry; SHM parameters of outbound calls
    /// are pinned for the duration of the call.
    pub fn with_shm(mut self, shm: Arc<ShmRegistry>) -> Self {
        self.shm = Some(shm);
        self
    }

    /// Issue a synchronous call and await its response, bounded by the
    /// configured default timeout.
    pub async fn invoke(&self, message: Message) -> Result<Message> {
        self.invoke_with_timeout(message, self.config.default_timeout)
            .await
    }

    /// Issue a synchronous call with an explicit deadline
    pub async fn invoke_with_timeout(
        &self,
        mut message: Message,
        deadline: Duration,
    ) -> Result<Message> {
        self.check_open()?;
        if !message.header.is_sync() {
            return Err(Error::Internal(
                "invoke requires a synchronous call frame".into(),
            ));
        }

        let _pins = self.pin_regions(&message)?;
        let id = self.allocate_id();
        message.header.message_id = id;
        let frame = message.encode()?;

        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(id, tx);
        // If this future is dropped before completion (a lost select!,
        // an aborted task), the entry must not linger in the table.
        let _evict = PendingEntry { client: self, id };

        self.transport.send(&frame)?;

        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(Ok(Completion::Response(response))) => check_status(response),
            Ok(Ok(Completion::Failed(error))) => Err(error),
            Ok(Err(_closed)) => Err(Error::Internal(
                "pending call dropped without completion".into(),
            )),
            Err(_elapsed) => {
                if self.pending.remove(&id).is_some() {
                    // We won the entry: the call is dead, remember the
                    // token so a straggler reads as a duplicate.
                    self.completed.lock().put(id, ());
                    Err(Error::Timeout)
                } else {
                    // The response path won the entry at the deadline.
                    // Its completion is in the channel unless we caught
                    // it mid-send, in which case the call reads as
                    // timed out and the straggler as a duplicate.
                    match rx.try_recv() {
                        Ok(Completion::Response(response)) => check_status(response),
                        Ok(Completion::Failed(error)) => Err(error),
                        Err(_) => Err(Error::Timeout),
                    }
                }
            }
        }
    }

    /// Send a fire-and-forget call or event; no correlation entry is
    /// created and no response will ever match it.
    pub fn post(&self, mut message: Message) -> Result<()> {
        self.check_open()?;
        if message.header.is_sync() || message.header.is_response() {
            return Err(Error::Internal(
                "post requires a fire-and-forget or event frame".into(),
            ));
        }
        let _pins = self.pin_regions(&message)?;
        message.header.message_id = self.allocate_id();
        let frame = message.encode()?;
        self.transport.send(&frame)
    }

    /// Ask the server to include this connection in broadcasts of
    /// `protocol_id` (0xFF subscribes to everything).
    pub fn subscribe(&self, protocol_id: u8) -> Result<()> {
        self.post(control_call(CONTROL_SUBSCRIBE, vec![Param::u8(protocol_id)]))
    }

    /// Withdraw a subscription (0xFF withdraws everything)
    pub fn unsubscribe(&self, protocol_id: u8) -> Result<()> {
        self.post(control_call(CONTROL_UNSUBSCRIBE, vec![Param::u8(protocol_id)]))
    }

    /// Ask the server to emit one `protocol_info` event per registered
    /// protocol back to this connection.
    pub fn list_protocols(&self) -> Result<()> {
        self.post(control_call(CONTROL_LIST_PROTOCOLS, Vec::new()))
    }

    /// Feed one inbound frame from the transport.
    ///
    /// Responses complete their pending call; events go through the
    /// registry. Structural and correlation errors condemn the single
    /// frame, never the connection.
    pub fn handle_frame(&self, bytes: &[u8]) -> Result<()> {
        let message = Message::decode(bytes, self.config.max_message_size)?;
        let header = message.header;

        if header.is_response() {
            let id = header.message_id;
            return match self.pending.remove(&id) {
                Some((_, tx)) => {
                    self.completed.lock().put(id, ());
                    // The caller may have given up between the removal
                    // race and this send; nothing left to complete then.
                    let _ = tx.send(Completion::Response(message));
                    Ok(())
                }
                None if self.completed.lock().contains(&id) => {
                    log::warn!("dropping duplicate response for call {}", id);
                    Err(Error::DuplicateResponse(id))
                }
                None => {
                    log::warn!("dropping orphaned response for call {}", id);
                    Err(Error::OrphanedResponse(id))
                }
            };
        }

        if header.is_event() {
            return self.registry.dispatch(&message).map(|_| ());
        }

        Err(Error::MalformedMessage {
            reason: "request frame received on the client side".into(),
        })
    }

    /// Tear down every outstanding call after the transport dropped.
    /// Each blocked caller observes [`Error::ConnectionLost`] exactly once.
    pub fn connection_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
        self.abort_pending(|| Error::ConnectionLost);
    }

    /// Stop accepting new calls and fail the outstanding ones
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.abort_pending(|| Error::Shutdown);
    }

    /// Outstanding synchronous calls
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn abort_pending(&self, error: impl Fn() -> Error) {
        let ids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Completion::Failed(error()));
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        if self.lost.load(Ordering::SeqCst) {
            return Err(Error::ConnectionLost);
        }
        Ok(())
    }

    fn allocate_id(&self) -> u32 {
        // Token 0 stays unused so a zeroed header never matches a call.
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn pin_regions(&self, message: &Message) -> Result<Vec<ShmPin>> {
        let Some(shm) = &self.shm else {
            return Ok(Vec::new());
        };
        let mut pins = Vec::new();
        for param in &message.params {
            if let Param::Shm { handle, .. } = param {
                pins.push(shm.pin(*handle)?);
            }
        }
        Ok(pins)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.abort_pending(|| Error::Shutdown);
    }
}

/// Eviction guard for one pending call. Completion paths remove the
/// entry themselves; this drop catches abandoned futures so the table
/// never leaks and a straggler response reads as a duplicate.
struct PendingEntry<'a> {
    client: &'a Client,
    id: u32,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.client.pending.remove(&self.id).is_some() {
            self.client.completed.lock().put(self.id, ());
        }
    }
}

fn control_call(action: u8, params: Vec<Param>) -> Message {
    Message::call(CONTROL_PROTOCOL_ID, action, false, params, Vec::new())
}

/// Map an error status on a response frame to the caller-visible error
fn check_status(response: Message) -> Result<Message> {
    let header = &response.header;
    match Status::from_wire(header.status) {
        Some(Status::Ok) => Ok(response),
        Some(Status::ProtocolNotFound) => Err(Error::ProtocolNotFound(header.protocol_id)),
        Some(Status::ActionNotFound) => Err(Error::ActionNotFound {
            protocol: header.protocol_id,
            action: header.action_id,
        }),
        Some(Status::HandlerFault) => Err(Error::HandlerFault(format!(
            "remote handler for {}:{} faulted",
            header.protocol_id, header.action_id
        ))),
        None => Err(Error::MalformedMessage {
            reason: format!("unknown status byte {}", header.status),
        }),
    }
}
