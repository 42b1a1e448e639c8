// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Server runtime: per-peer dispatch, the control protocol, and event
//! fan-out over subscription sets.
//!
//! Each connected peer carries a 256-bit subscription set indexed by
//! protocol id. Broadcasts deliver to every subscribed peer best-effort;
//! one failing link never blocks delivery to the rest.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::registry::ActionRegistry;
use crate::schema::{
    CONTROL_LIST_PROTOCOLS, CONTROL_PROTOCOL_ID, CONTROL_PROTOCOL_INFO, CONTROL_SUBSCRIBE,
    CONTROL_UNSUBSCRIBE, SUBSCRIBE_ALL,
};
use crate::transport::Transport;
use crate::wire::{Message, Param, DEFAULT_MAX_MESSAGE_SIZE};

/// Connection identifier assigned by the embedder's accept loop
pub type PeerId = u64;

/// Server tuning knobs
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Inbound frame size cap
    pub max_message_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// 256-bit subscription set, one bit per protocol id
struct SubscriptionSet {
    blocks: [u32; 8],
}

impl SubscriptionSet {
    fn new() -> Self {
        Self { blocks: [0; 8] }
    }

    fn add(&mut self, protocol_id: u8) {
        self.blocks[protocol_id as usize / 32] |= 1 << (protocol_id % 32);
    }

    fn remove(&mut self, protocol_id: u8) {
        self.blocks[protocol_id as usize / 32] &= !(1 << (protocol_id % 32));
    }

    fn add_all(&mut self) {
        self.blocks = [u32::MAX; 8];
    }

    fn contains(&self, protocol_id: u8) -> bool {
        self.blocks[protocol_id as usize / 32] & (1 << (protocol_id % 32)) != 0
    }
}

struct Peer {
    transport: Arc<dyn Transport>,
    subscriptions: Mutex<SubscriptionSet>,
}

/// One listening endpoint dispatching calls and fanning out events
pub struct Server {
    registry: Arc<ActionRegistry>,
    peers: DashMap<PeerId, Peer>,
    next_event_id: AtomicU32,
    config: ServerConfig,
}

impl Server {
    pub fn new(registry: Arc<ActionRegistry>, config: ServerConfig) -> Self {
        Self {
            registry,
            peers: DashMap::new(),
            next_event_id: AtomicU32::new(1),
            config,
        }
    }

    /// Register a newly accepted connection. Peers start with an empty
    /// subscription set and opt in through the control protocol.
    pub fn add_peer(&self, id: PeerId, transport: Arc<dyn Transport>) {
        self.peers.insert(id, Peer {
            transport,
            subscriptions: Mutex::new(SubscriptionSet::new()),
        });
        log::debug!("peer {} connected", id);
    }

    /// Drop a connection and its subscriptions
    pub fn remove_peer(&self, id: PeerId) -> Result<()> {
        self.peers
            .remove(&id)
            .map(|_| log::debug!("peer {} disconnected", id))
            .ok_or(Error::PeerNotFound(id))
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Feed one inbound frame from `peer`'s transport.
    ///
    /// Synchronous calls are answered on the same connection, success or
    /// dispatch failure alike. Fire-and-forget and event frames have no
    /// response path, so their failures are logged and surfaced to the
    /// caller of this method only.
    pub fn handle_frame(&self, peer: PeerId, bytes: &[u8]) -> Result<()> {
        let message = Message::decode(bytes, self.config.max_message_size)?;

        if message.header.protocol_id == CONTROL_PROTOCOL_ID {
            return self.handle_control(peer, &message);
        }

        match self.registry.dispatch(&message) {
            Ok(Some(response)) => self.send_frame(peer, &response),
            Ok(None) => Ok(()),
            Err(error) => {
                log::warn!(
                    "dispatch of {}:{} from peer {} failed: {}",
                    message.header.protocol_id,
                    message.header.action_id,
                    peer,
                    error
                );
                Err(error)
            }
        }
    }

    /// Push an event to a single peer, regardless of its subscriptions
    pub fn send_to(&self, peer: PeerId, mut event: Message) -> Result<()> {
        if !event.header.is_event() {
            return Err(Error::Internal("send_to requires an event frame".into()));
        }
        event.header.message_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        self.send_frame(peer, &event)
    }

    /// Push an event to every peer subscribed to its protocol.
    ///
    /// Delivery is best-effort: a failing link is logged and skipped.
    /// Returns how many peers the event was delivered to.
    pub fn broadcast(&self, mut event: Message) -> Result<usize> {
        if !event.header.is_event() {
            return Err(Error::Internal(
                "broadcast requires an event frame".into(),
            ));
        }
        event.header.message_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let frame = event.encode()?;

        let mut delivered = 0;
        for entry in self.peers.iter() {
            if !entry.subscriptions.lock().contains(event.header.protocol_id) {
                continue;
            }
            match entry.transport.send(&frame) {
                Ok(()) => delivered += 1,
                Err(error) => log::warn!(
                    "broadcast of {}:{} to peer {} failed: {}",
                    event.header.protocol_id,
                    event.header.action_id,
                    entry.key(),
                    error
                ),
            }
        }
        Ok(delivered)
    }

    fn handle_control(&self, peer: PeerId, message: &Message) -> Result<()> {
        match message.header.action_id {
            CONTROL_SUBSCRIBE => {
                let target = control_target(message)?;
                let entry = self.peers.get(&peer).ok_or(Error::PeerNotFound(peer))?;
                let mut subscriptions = entry.subscriptions.lock();
                if target == SUBSCRIBE_ALL {
                    subscriptions.add_all();
                } else {
                    subscriptions.add(target);
                }
                Ok(())
            }
            CONTROL_UNSUBSCRIBE => {
                let target = control_target(message)?;
                if target == SUBSCRIBE_ALL {
                    // Wildcard withdrawal is how a peer says goodbye.
                    return self.remove_peer(peer);
                }
                let entry = self.peers.get(&peer).ok_or(Error::PeerNotFound(peer))?;
                entry.subscriptions.lock().remove(target);
                Ok(())
            }
            CONTROL_LIST_PROTOCOLS => {
                for def in self.registry.protocols() {
                    let info = Message::event(
                        CONTROL_PROTOCOL_ID,
                        CONTROL_PROTOCOL_INFO,
                        vec![
                            Param::string(Some(&def.namespace)),
                            Param::u8(def.id),
                        ],
                    );
                    self.send_to(peer, info)?;
                }
                Ok(())
            }
            other => Err(Error::ActionNotFound {
                protocol: CONTROL_PROTOCOL_ID,
                action: other,
            }),
        }
    }

    fn send_frame(&self, peer: PeerId, message: &Message) -> Result<()> {
        let entry = self.peers.get(&peer).ok_or(Error::PeerNotFound(peer))?;
        entry.transport.send(&message.encode()?)
    }
}

fn control_target(message: &Message) -> Result<u8> {
    message
        .params
        .first()
        .ok_or_else(|| Error::MalformedMessage {
            reason: "control call without a protocol id parameter".into(),
        })?
        .as_u8()
}
