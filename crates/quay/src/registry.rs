// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Action registry: two-level (protocol id, action id) dispatch.
//!
//! Protocols occupy a dense 256-slot table indexed by protocol id;
//! actions within a protocol are dense by construction (sequential ids
//! from the schema loader), so both lookups are direct indexing. Handlers
//! respond by returning an outcome; the registry builds the single
//! response frame itself, so a handler cannot reply twice or reply to a
//! fire-and-forget call.

use std::fmt;

use crate::error::{Error, Result, Status};
use crate::schema::{ActionDef, ActionKind, CallKind, ParamDef, ProtocolDef};
use crate::wire::{Message, MessageHeader, Param, ParamKind};

/// An inbound invocation handed to a handler
#[derive(Debug, Clone)]
pub struct Call {
    pub header: MessageHeader,
    pub params: Vec<Param>,
}

impl Call {
    /// Input parameter by position
    pub fn param(&self, index: usize) -> Result<&Param> {
        self.params.get(index).ok_or_else(|| Error::MalformedMessage {
            reason: format!(
                "call {}:{} has {} parameters, wanted index {}",
                self.header.protocol_id,
                self.header.action_id,
                self.params.len(),
                index
            ),
        })
    }
}

/// What a function handler produced: response parameters on success, a
/// fault description otherwise. For fire-and-forget functions the
/// parameters must be empty.
pub type CallOutcome = std::result::Result<Vec<Param>, String>;

/// Handler for function calls (sync and fire-and-forget)
pub trait CallHandler: Send + Sync {
    fn handle(&self, call: Call) -> CallOutcome;
}

impl<F> CallHandler for F
where
    F: Fn(Call) -> CallOutcome + Send + Sync,
{
    fn handle(&self, call: Call) -> CallOutcome {
        self(call)
    }
}

/// Handler for received events; events have no response path
pub trait NotifyHandler: Send + Sync {
    fn handle(&self, call: Call);
}

impl<F> NotifyHandler for F
where
    F: Fn(Call) + Send + Sync,
{
    fn handle(&self, call: Call) {
        self(call)
    }
}

struct ProtocolSlot {
    def: ProtocolDef,
    calls: Vec<Option<Box<dyn CallHandler>>>,
    notifies: Vec<Option<Box<dyn NotifyHandler>>>,
}

impl fmt::Debug for ProtocolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSlot")
            .field("namespace", &self.def.namespace)
            .field("id", &self.def.id)
            .finish()
    }
}

/// Builder for an [`ActionRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    slots: Vec<ProtocolSlot>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolved protocol definition
    pub fn protocol(mut self, def: ProtocolDef) -> Result<Self> {
        if self.slots.iter().any(|slot| slot.def.id == def.id) {
            return Err(Error::InvalidSchema(format!(
                "protocol id {} registered twice",
                def.id
            )));
        }
        let action_count = def.actions.len();
        self.slots.push(ProtocolSlot {
            def,
            calls: (0..action_count).map(|_| None).collect(),
            notifies: (0..action_count).map(|_| None).collect(),
        });
        Ok(self)
    }

    /// Attach a function handler by protocol id and action name
    pub fn on_call(
        mut self,
        protocol_id: u8,
        action: &str,
        handler: impl CallHandler + 'static,
    ) -> Result<Self> {
        let slot = self.slot_mut(protocol_id)?;
        let def = slot
            .def
            .action_by_name(action)
            .ok_or(Error::ActionNotFound {
                protocol: protocol_id,
                action: 0,
            })?;
        if !matches!(def.kind, ActionKind::Function { .. }) {
            return Err(Error::InvalidSchema(format!(
                "'{}' is an event, not a function",
                action
            )));
        }
        let index = def.action_id as usize;
        slot.calls[index] = Some(Box::new(handler));
        Ok(self)
    }

    /// Attach an event handler by protocol id and action name
    pub fn on_notify(
        mut self,
        protocol_id: u8,
        action: &str,
        handler: impl NotifyHandler + 'static,
    ) -> Result<Self> {
        let slot = self.slot_mut(protocol_id)?;
        let def = slot
            .def
            .action_by_name(action)
            .ok_or(Error::ActionNotFound {
                protocol: protocol_id,
                action: 0,
            })?;
        if !matches!(def.kind, ActionKind::Event { .. }) {
            return Err(Error::InvalidSchema(format!(
                "'{}' is a function, not an event",
                action
            )));
        }
        let index = def.action_id as usize;
        slot.notifies[index] = Some(Box::new(handler));
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        let mut table: Vec<Option<ProtocolSlot>> = (0..=u8::MAX as usize).map(|_| None).collect();
        for slot in self.slots {
            let index = slot.def.id as usize;
            table[index] = Some(slot);
        }
        ActionRegistry { table }
    }

    fn slot_mut(&mut self, protocol_id: u8) -> Result<&mut ProtocolSlot> {
        self.slots
            .iter_mut()
            .find(|slot| slot.def.id == protocol_id)
            .ok_or(Error::ProtocolNotFound(protocol_id))
    }
}

/// Immutable dispatch table shared by receive paths
pub struct ActionRegistry {
    table: Vec<Option<ProtocolSlot>>,
}

impl ActionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registered protocol definition by id
    pub fn protocol(&self, protocol_id: u8) -> Option<&ProtocolDef> {
        self.table[protocol_id as usize].as_ref().map(|slot| &slot.def)
    }

    /// All registered protocols, in id order
    pub fn protocols(&self) -> impl Iterator<Item = &ProtocolDef> {
        self.table.iter().flatten().map(|slot| &slot.def)
    }

    /// Dispatch a decoded inbound message.
    ///
    /// Returns the response frame to send back for synchronous calls
    /// (success or status-only failure), `None` for fire-and-forget
    /// calls and events. Errors are returned only when no response
    /// frame can express the failure (events, fire-and-forget).
    pub fn dispatch(&self, message: &Message) -> Result<Option<Message>> {
        let header = &message.header;
        if header.is_response() {
            return Err(Error::MalformedMessage {
                reason: "response frame routed to dispatch".into(),
            });
        }

        let (slot, action) = match self.lookup(header) {
            Ok(found) => found,
            Err(error) => {
                // Only a blocked caller can observe the failure.
                if header.is_sync() {
                    let status = Status::for_dispatch_error(&error);
                    return Ok(Some(Message::status_response(header, status)));
                }
                return Err(error);
            }
        };

        let index = header.action_id as usize;
        match (&slot.def.actions[index].kind, header.is_event()) {
            (ActionKind::Event { .. }, true) => {
                let Some(handler) = slot.notifies[index].as_ref() else {
                    return Err(Error::ActionNotFound {
                        protocol: header.protocol_id,
                        action: header.action_id,
                    });
                };
                handler.handle(Call {
                    header: *header,
                    params: message.params.clone(),
                });
                Ok(None)
            }
            (ActionKind::Function { call, response, .. }, false) => {
                let expected_sync = *call == CallKind::Sync;
                if header.is_sync() != expected_sync {
                    return Err(Error::MalformedMessage {
                        reason: format!(
                            "flags disagree with declared call kind of {}::{}",
                            slot.def.namespace, action.name
                        ),
                    });
                }
                let Some(handler) = slot.calls[index].as_ref() else {
                    let error = Error::ActionNotFound {
                        protocol: header.protocol_id,
                        action: header.action_id,
                    };
                    if expected_sync {
                        let status = Status::for_dispatch_error(&error);
                        return Ok(Some(Message::status_response(header, status)));
                    }
                    return Err(error);
                };

                let outcome = handler.handle(Call {
                    header: *header,
                    params: message.params.clone(),
                });
                self.finish_call(header, response, expected_sync, outcome)
            }
            (ActionKind::Event { .. }, false) | (ActionKind::Function { .. }, true) => {
                Err(Error::MalformedMessage {
                    reason: format!(
                        "flags disagree with declared action kind of {}::{}",
                        slot.def.namespace, action.name
                    ),
                })
            }
        }
    }

    fn lookup(&self, header: &MessageHeader) -> Result<(&ProtocolSlot, &ActionDef)> {
        let slot = self.table[header.protocol_id as usize]
            .as_ref()
            .ok_or(Error::ProtocolNotFound(header.protocol_id))?;
        let action = slot
            .def
            .action(header.action_id)
            .ok_or(Error::ActionNotFound {
                protocol: header.protocol_id,
                action: header.action_id,
            })?;
        Ok((slot, action))
    }

    fn finish_call(
        &self,
        header: &MessageHeader,
        response: &[ParamDef],
        sync: bool,
        outcome: CallOutcome,
    ) -> Result<Option<Message>> {
        match outcome {
            Ok(params) if sync => {
                if let Err(error) = validate_response(response, &params) {
                    log::warn!(
                        "handler for {}:{} produced invalid response: {}",
                        header.protocol_id,
                        header.action_id,
                        error
                    );
                    return Ok(Some(Message::status_response(header, Status::HandlerFault)));
                }
                Ok(Some(Message::response_to(header, params)))
            }
            Ok(params) => {
                if !params.is_empty() {
                    log::warn!(
                        "fire-and-forget handler for {}:{} returned {} parameters, dropped",
                        header.protocol_id,
                        header.action_id,
                        params.len()
                    );
                }
                Ok(None)
            }
            Err(fault) if sync => {
                log::warn!(
                    "handler for {}:{} faulted: {}",
                    header.protocol_id,
                    header.action_id,
                    fault
                );
                Ok(Some(Message::status_response(header, Status::HandlerFault)))
            }
            Err(fault) => Err(Error::HandlerFault(fault)),
        }
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.table.iter().flatten()).finish()
    }
}

/// Check handler output against the declared response layouts: matching
/// arity, matching kinds, and buffers within their declared capacity.
fn validate_response(declared: &[ParamDef], produced: &[Param]) -> Result<()> {
    if declared.len() != produced.len() {
        return Err(Error::HandlerFault(format!(
            "response arity {} does not match declared {}",
            produced.len(),
            declared.len()
        )));
    }
    for (def, param) in declared.iter().zip(produced) {
        if param.kind() == ParamKind::Shm {
            return Err(Error::HandlerFault(format!(
                "response parameter '{}' is a shm region",
                def.name
            )));
        }
        if param.kind() != def.layout.wire_kind() {
            return Err(Error::HandlerFault(format!(
                "response parameter '{}' has kind {:?}, declared {:?}",
                def.name,
                param.kind(),
                def.layout.wire_kind()
            )));
        }
        if let (Param::Buffer(data), capacity) = (param, def.layout.storage_len()) {
            if data.len() > capacity as usize {
                return Err(Error::BufferOverrun {
                    declared: capacity,
                    actual: data.len(),
                });
            }
        }
    }
    Ok(())
}
