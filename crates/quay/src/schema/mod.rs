// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Resolved protocol definitions and the schema loader.
//!
//! The code generator hands the runtime an already-parsed description of
//! each protocol: a namespace, a numeric id in 1..=255, and an ordered
//! list of functions and events. The loader assigns sequential action ids
//! in declaration order, classifies each function as sync or async from
//! its response arity, and rejects descriptions that cannot dispatch
//! soundly. No XML parsing happens here.

use crate::error::{Error, Result};
use crate::wire::{OutParam, ParamKind};

/// The implicit control protocol for event-channel subscription management
pub const CONTROL_PROTOCOL_ID: u8 = 0;
/// Control action: subscribe to a protocol's broadcasts
pub const CONTROL_SUBSCRIBE: u8 = 0;
/// Control action: unsubscribe from a protocol's broadcasts
pub const CONTROL_UNSUBSCRIBE: u8 = 1;
/// Control action: request one `protocol_info` event per registered protocol
pub const CONTROL_LIST_PROTOCOLS: u8 = 2;
/// Control event: a single registered protocol's name and id
pub const CONTROL_PROTOCOL_INFO: u8 = 3;
/// Wildcard protocol id: subscribe/unsubscribe all protocols at once
pub const SUBSCRIBE_ALL: u8 = 0xFF;

/// Action names reserved for the control protocol
const RESERVED_NAMES: [&str; 2] = ["subscribe", "unsubscribe"];

/// Logical parameter type as declared in the protocol description.
///
/// Each logical type maps through two pure transforms: [`wire_kind`]
/// (how it travels) and [`storage_len`] (how much space it declares).
/// The call-site transform is the [`crate::wire::Param`] constructor the
/// generated stub picks for it.
///
/// [`wire_kind`]: ParamLayout::wire_kind
/// [`storage_len`]: ParamLayout::storage_len
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLayout {
    /// Scalar of 1, 2, 4 or 8 bytes, carried inside the descriptor
    Value { width: u8 },
    /// NUL-terminated optional string with a declared maximum length
    String { max: u32 },
    /// Raw byte buffer with a declared capacity
    Buffer { capacity: u32 },
    /// Shared-memory region reference
    Shm,
}

impl ParamLayout {
    /// Descriptor kind this logical type travels as
    pub fn wire_kind(&self) -> ParamKind {
        match self {
            Self::Value { .. } => ParamKind::Value,
            Self::String { .. } | Self::Buffer { .. } => ParamKind::Buffer,
            Self::Shm => ParamKind::Shm,
        }
    }

    /// Declared storage size in bytes (0 for SHM: the region carries its
    /// own length at call time)
    pub fn storage_len(&self) -> u32 {
        match self {
            Self::Value { width } => u32::from(*width),
            Self::String { max } => *max,
            Self::Buffer { capacity } => *capacity,
            Self::Shm => 0,
        }
    }

    /// Response placeholder reserving this layout's reply capacity.
    /// SHM has no placeholder form; the loader rejects SHM response
    /// parameters before this is ever reached.
    pub fn placeholder(&self) -> Option<OutParam> {
        match self {
            Self::Value { width } => Some(OutParam::value(*width)),
            Self::String { max } => Some(OutParam::buffer(*max)),
            Self::Buffer { capacity } => Some(OutParam::buffer(*capacity)),
            Self::Shm => None,
        }
    }

    fn validate(&self, context: &str) -> Result<()> {
        if let Self::Value { width } = self {
            if !matches!(width, 1 | 2 | 4 | 8) {
                return Err(Error::InvalidSchema(format!(
                    "{}: value width {} is not 1, 2, 4 or 8",
                    context, width
                )));
            }
        }
        Ok(())
    }
}

/// A formal parameter in a function request/response or an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    pub name: String,
    pub layout: ParamLayout,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, layout: ParamLayout) -> Self {
        Self {
            name: name.into(),
            layout,
        }
    }
}

/// Whether a function's caller blocks for a correlated response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// At least one response parameter; the caller awaits the response
    Sync,
    /// No response parameters; fire-and-forget
    Async,
}

/// An unresolved function as produced by the generator front-end.
///
/// `synchronous` mirrors an explicit schema attribute where one exists;
/// arity is authoritative and a contradicting attribute is rejected.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub synchronous: Option<bool>,
    pub request: Vec<ParamDef>,
    pub response: Vec<ParamDef>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            synchronous: None,
            request: Vec::new(),
            response: Vec::new(),
        }
    }

    pub fn synchronous(mut self, value: bool) -> Self {
        self.synchronous = Some(value);
        self
    }

    pub fn request(mut self, params: Vec<ParamDef>) -> Self {
        self.request = params;
        self
    }

    pub fn response(mut self, params: Vec<ParamDef>) -> Self {
        self.response = params;
        self
    }
}

/// An unresolved event as produced by the generator front-end
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub name: String,
    pub params: Vec<ParamDef>,
}

impl EventSpec {
    pub fn new(name: impl Into<String>, params: Vec<ParamDef>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// One declared action, in declaration order
#[derive(Debug, Clone)]
pub enum ActionSpec {
    Function(FunctionSpec),
    Event(EventSpec),
}

/// An unresolved protocol description
#[derive(Debug, Clone)]
pub struct ProtocolSpec {
    pub namespace: String,
    pub id: u8,
    pub actions: Vec<ActionSpec>,
}

impl ProtocolSpec {
    pub fn new(namespace: impl Into<String>, id: u8) -> Self {
        Self {
            namespace: namespace.into(),
            id,
            actions: Vec::new(),
        }
    }

    pub fn function(mut self, function: FunctionSpec) -> Self {
        self.actions.push(ActionSpec::Function(function));
        self
    }

    pub fn event(mut self, event: EventSpec) -> Self {
        self.actions.push(ActionSpec::Event(event));
        self
    }

    /// Resolve into a dispatchable definition: assign sequential action
    /// ids, classify sync/async, enforce the reserved names and id range.
    pub fn resolve(self) -> Result<ProtocolDef> {
        if self.id == CONTROL_PROTOCOL_ID {
            return Err(Error::InvalidSchema(format!(
                "protocol '{}': id 0 is reserved for the control protocol",
                self.namespace
            )));
        }
        if self.actions.len() > u8::MAX as usize {
            return Err(Error::InvalidSchema(format!(
                "protocol '{}': more than 255 actions",
                self.namespace
            )));
        }

        let mut ids = IdAllocator::default();
        let mut actions = Vec::with_capacity(self.actions.len());
        for spec in self.actions {
            let action = match spec {
                ActionSpec::Function(function) => {
                    resolve_function(&self.namespace, function, &mut ids)?
                }
                ActionSpec::Event(event) => resolve_event(&self.namespace, event, &mut ids)?,
            };
            actions.push(action);
        }

        for action in &actions {
            if actions
                .iter()
                .filter(|other| other.name == action.name)
                .count()
                > 1
            {
                return Err(Error::InvalidSchema(format!(
                    "protocol '{}': duplicate action name '{}'",
                    self.namespace, action.name
                )));
            }
        }

        Ok(ProtocolDef {
            namespace: self.namespace,
            id: self.id,
            actions,
        })
    }
}

/// Sequence counter for action ids, one instance per protocol resolution
#[derive(Default)]
struct IdAllocator {
    next: u8,
}

impl IdAllocator {
    fn allocate(&mut self) -> u8 {
        let id = self.next;
        self.next += 1;
        id
    }
}

fn validate_params(namespace: &str, action: &str, params: &[ParamDef]) -> Result<()> {
    for param in params {
        param
            .layout
            .validate(&format!("{}::{} parameter '{}'", namespace, action, param.name))?;
    }
    Ok(())
}

fn resolve_function(
    namespace: &str,
    function: FunctionSpec,
    ids: &mut IdAllocator,
) -> Result<ActionDef> {
    if RESERVED_NAMES.contains(&function.name.as_str()) {
        return Err(Error::InvalidSchema(format!(
            "protocol '{}': action name '{}' is reserved",
            namespace, function.name
        )));
    }
    validate_params(namespace, &function.name, &function.request)?;
    validate_params(namespace, &function.name, &function.response)?;

    for param in &function.response {
        if param.layout == ParamLayout::Shm {
            return Err(Error::InvalidSchema(format!(
                "{}::{}: response parameter '{}' cannot be a shm region",
                namespace, function.name, param.name
            )));
        }
    }

    // Arity decides; an explicit attribute may only agree with it.
    let call = if function.response.is_empty() {
        CallKind::Async
    } else {
        CallKind::Sync
    };
    if let Some(declared) = function.synchronous {
        let agrees = declared == (call == CallKind::Sync);
        if !agrees {
            return Err(Error::InvalidSchema(format!(
                "{}::{}: synchronous attribute contradicts response arity",
                namespace, function.name
            )));
        }
    }

    Ok(ActionDef {
        name: function.name,
        action_id: ids.allocate(),
        kind: ActionKind::Function {
            call,
            request: function.request,
            response: function.response,
        },
    })
}

fn resolve_event(namespace: &str, event: EventSpec, ids: &mut IdAllocator) -> Result<ActionDef> {
    if RESERVED_NAMES.contains(&event.name.as_str()) {
        return Err(Error::InvalidSchema(format!(
            "protocol '{}': action name '{}' is reserved",
            namespace, event.name
        )));
    }
    validate_params(namespace, &event.name, &event.params)?;
    Ok(ActionDef {
        name: event.name,
        action_id: ids.allocate(),
        kind: ActionKind::Event {
            params: event.params,
        },
    })
}

/// A resolved, dispatchable protocol
#[derive(Debug, Clone)]
pub struct ProtocolDef {
    pub namespace: String,
    pub id: u8,
    /// Dense: `actions[i].action_id == i`
    pub actions: Vec<ActionDef>,
}

impl ProtocolDef {
    pub fn action(&self, action_id: u8) -> Option<&ActionDef> {
        self.actions.get(action_id as usize)
    }

    pub fn action_by_name(&self, name: &str) -> Option<&ActionDef> {
        self.actions.iter().find(|action| action.name == name)
    }

    /// Output placeholders for a synchronous call to `action_id`, sized
    /// from the declared response layouts.
    pub fn placeholders(&self, action_id: u8) -> Option<Vec<OutParam>> {
        match &self.action(action_id)?.kind {
            ActionKind::Function { response, .. } => response
                .iter()
                .map(|param| param.layout.placeholder())
                .collect(),
            ActionKind::Event { .. } => None,
        }
    }
}

/// A resolved function or event
#[derive(Debug, Clone)]
pub struct ActionDef {
    pub name: String,
    pub action_id: u8,
    pub kind: ActionKind,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    Function {
        call: CallKind,
        request: Vec<ParamDef>,
        response: Vec<ParamDef>,
    },
    Event {
        params: Vec<ParamDef>,
    },
}

impl ActionDef {
    pub fn call_kind(&self) -> Option<CallKind> {
        match &self.kind {
            ActionKind::Function { call, .. } => Some(*call),
            ActionKind::Event { .. } => None,
        }
    }
}

/// The built-in control protocol definition: subscribe, unsubscribe,
/// list_protocols, and the protocol_info event, in that id order.
pub fn control_protocol() -> ProtocolDef {
    ProtocolDef {
        namespace: "quay.control".into(),
        id: CONTROL_PROTOCOL_ID,
        actions: vec![
            ActionDef {
                name: "subscribe".into(),
                action_id: CONTROL_SUBSCRIBE,
                kind: ActionKind::Function {
                    call: CallKind::Async,
                    request: vec![ParamDef::new("protocol_id", ParamLayout::Value { width: 1 })],
                    response: Vec::new(),
                },
            },
            ActionDef {
                name: "unsubscribe".into(),
                action_id: CONTROL_UNSUBSCRIBE,
                kind: ActionKind::Function {
                    call: CallKind::Async,
                    request: vec![ParamDef::new("protocol_id", ParamLayout::Value { width: 1 })],
                    response: Vec::new(),
                },
            },
            ActionDef {
                name: "list_protocols".into(),
                action_id: CONTROL_LIST_PROTOCOLS,
                kind: ActionKind::Function {
                    call: CallKind::Async,
                    request: Vec::new(),
                    response: Vec::new(),
                },
            },
            ActionDef {
                name: "protocol_info".into(),
                action_id: CONTROL_PROTOCOL_INFO,
                kind: ActionKind::Event {
                    params: vec![
                        ParamDef::new("namespace", ParamLayout::String { max: 64 }),
                        ParamDef::new("protocol_id", ParamLayout::Value { width: 1 }),
                    ],
                },
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_protocol() -> ProtocolSpec {
        ProtocolSpec::new("test.echo", 7)
            .function(
                FunctionSpec::new("echo")
                    .request(vec![ParamDef::new("value", ParamLayout::Value { width: 4 })])
                    .response(vec![ParamDef::new("value", ParamLayout::Value { width: 4 })]),
            )
            .function(
                FunctionSpec::new("notify")
                    .request(vec![ParamDef::new("code", ParamLayout::Value { width: 2 })]),
            )
            .event(EventSpec::new(
                "changed",
                vec![ParamDef::new("detail", ParamLayout::String { max: 32 })],
            ))
    }

    #[test]
    fn action_ids_are_sequential_in_declaration_order() {
        let def = echo_protocol().resolve().expect("valid protocol");
        assert_eq!(def.actions.len(), 3);
        for (index, action) in def.actions.iter().enumerate() {
            assert_eq!(action.action_id as usize, index);
        }
        assert_eq!(def.action_by_name("echo").expect("echo").action_id, 0);
        assert_eq!(def.action_by_name("changed").expect("changed").action_id, 2);
    }

    #[test]
    fn arity_classifies_sync_and_async() {
        let def = echo_protocol().resolve().expect("valid protocol");
        assert_eq!(
            def.action_by_name("echo").expect("echo").call_kind(),
            Some(CallKind::Sync)
        );
        assert_eq!(
            def.action_by_name("notify").expect("notify").call_kind(),
            Some(CallKind::Async)
        );
        assert_eq!(
            def.action_by_name("changed").expect("changed").call_kind(),
            None
        );
    }

    #[test]
    fn sync_attribute_with_zero_responses_rejected() {
        let spec = ProtocolSpec::new("test.bad", 9).function(
            FunctionSpec::new("fire")
                .synchronous(true)
                .request(vec![ParamDef::new("x", ParamLayout::Value { width: 4 })]),
        );
        let err = spec.resolve().unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn agreeing_attribute_accepted() {
        let spec = ProtocolSpec::new("test.ok", 9).function(
            FunctionSpec::new("get")
                .synchronous(true)
                .response(vec![ParamDef::new("v", ParamLayout::Value { width: 8 })]),
        );
        assert!(spec.resolve().is_ok());
    }

    #[test]
    fn control_protocol_id_rejected_for_users() {
        let err = ProtocolSpec::new("test.zero", 0).resolve().unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn reserved_names_rejected() {
        let spec = ProtocolSpec::new("test.sub", 4)
            .function(FunctionSpec::new("subscribe").request(Vec::new()));
        assert!(matches!(
            spec.resolve().unwrap_err(),
            Error::InvalidSchema(_)
        ));

        let spec = ProtocolSpec::new("test.sub", 4).event(EventSpec::new("unsubscribe", vec![]));
        assert!(matches!(
            spec.resolve().unwrap_err(),
            Error::InvalidSchema(_)
        ));
    }

    #[test]
    fn shm_response_rejected() {
        let spec = ProtocolSpec::new("test.shm", 5).function(
            FunctionSpec::new("map")
                .response(vec![ParamDef::new("region", ParamLayout::Shm)]),
        );
        assert!(matches!(
            spec.resolve().unwrap_err(),
            Error::InvalidSchema(_)
        ));
    }

    #[test]
    fn duplicate_action_name_rejected() {
        let spec = ProtocolSpec::new("test.dup", 6)
            .function(FunctionSpec::new("poke"))
            .event(EventSpec::new("poke", vec![]));
        assert!(matches!(
            spec.resolve().unwrap_err(),
            Error::InvalidSchema(_)
        ));
    }

    #[test]
    fn invalid_value_width_rejected() {
        let spec = ProtocolSpec::new("test.width", 6).function(
            FunctionSpec::new("odd").request(vec![ParamDef::new(
                "x",
                ParamLayout::Value { width: 3 },
            )]),
        );
        assert!(matches!(
            spec.resolve().unwrap_err(),
            Error::InvalidSchema(_)
        ));
    }

    #[test]
    fn placeholders_follow_response_layouts() {
        let def = ProtocolSpec::new("test.ph", 8)
            .function(
                FunctionSpec::new("fetch")
                    .request(vec![ParamDef::new("key", ParamLayout::String { max: 16 })])
                    .response(vec![
                        ParamDef::new("status", ParamLayout::Value { width: 4 }),
                        ParamDef::new("data", ParamLayout::Buffer { capacity: 64 }),
                    ]),
            )
            .resolve()
            .expect("valid protocol");

        let outs = def.placeholders(0).expect("function placeholders");
        assert_eq!(outs, vec![OutParam::value(4), OutParam::buffer(64)]);
    }

    #[test]
    fn transforms_per_layout() {
        assert_eq!(ParamLayout::Value { width: 4 }.wire_kind(), ParamKind::Value);
        assert_eq!(ParamLayout::String { max: 9 }.wire_kind(), ParamKind::Buffer);
        assert_eq!(ParamLayout::Shm.wire_kind(), ParamKind::Shm);
        assert_eq!(ParamLayout::Value { width: 4 }.storage_len(), 4);
        assert_eq!(ParamLayout::Buffer { capacity: 128 }.storage_len(), 128);
        assert_eq!(ParamLayout::Shm.placeholder(), None);
    }

    #[test]
    fn control_protocol_shape() {
        let control = control_protocol();
        assert_eq!(control.id, CONTROL_PROTOCOL_ID);
        assert_eq!(
            control.action(CONTROL_SUBSCRIBE).expect("subscribe").name,
            "subscribe"
        );
        assert_eq!(
            control
                .action(CONTROL_PROTOCOL_INFO)
                .expect("protocol_info")
                .call_kind(),
            None
        );
        // Subscription management is fire-and-forget.
        assert_eq!(
            control.action(CONTROL_SUBSCRIBE).expect("subscribe").call_kind(),
            Some(CallKind::Async)
        );
    }
}
