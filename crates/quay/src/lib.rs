// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! # Quay - typed message runtime for IPC protocols
//!
//! A transport-agnostic runtime for request/response and event traffic
//! over generated protocol definitions: length-prefixed binary framing,
//! correlation of synchronous calls, (protocol, action) dispatch, and
//! subscription-based event fan-out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quay::{ActionRegistry, Call, Param, ProtocolSpec, FunctionSpec, ParamDef, ParamLayout, Result};
//!
//! fn main() -> Result<()> {
//!     let echo = ProtocolSpec::new("demo.echo", 7)
//!         .function(
//!             FunctionSpec::new("echo")
//!                 .request(vec![ParamDef::new("value", ParamLayout::Value { width: 4 })])
//!                 .response(vec![ParamDef::new("value", ParamLayout::Value { width: 4 })]),
//!         )
//!         .resolve()?;
//!
//!     let registry = ActionRegistry::builder()
//!         .protocol(echo)?
//!         .on_call(7, "echo", |call: Call| {
//!             let value = call.param(0).and_then(Param::as_u32).map_err(|e| e.to_string())?;
//!             Ok(vec![Param::u32(value)])
//!         })?
//!         .build();
//!     # let _ = registry;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Application Layer                       |
//! |        generated stubs -> Client::invoke / Server events     |
//! +--------------------------------------------------------------+
//! |                        Runtime Layer                         |
//! |  correlation table | action registry | subscriptions | shm   |
//! +--------------------------------------------------------------+
//! |                          Wire Layer                          |
//! |  16-byte header | descriptor array | inline buffer payloads  |
//! +--------------------------------------------------------------+
//! |                        Transport Seam                        |
//! |        embedder-provided frame delivery (Transport)          |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`wire`] - frame encoding and the length invariant
//! - [`schema`] - protocol definitions and action id assignment
//! - [`registry`] - (protocol, action) handler dispatch
//! - [`client`] - synchronous call correlation and event delivery
//! - [`server`] - per-peer dispatch and broadcast fan-out
//! - [`shm`] - shared-memory region handles and in-flight pinning
//! - [`transport`] - the seam between the runtime and byte movement

pub mod client;
pub mod error;
pub mod registry;
pub mod schema;
pub mod server;
pub mod shm;
pub mod transport;
pub mod wire;

pub use client::{Client, ClientConfig};
pub use error::{Error, Result, Status};
pub use registry::{ActionRegistry, Call, CallHandler, CallOutcome, NotifyHandler, RegistryBuilder};
pub use schema::{
    control_protocol, ActionDef, ActionKind, ActionSpec, CallKind, EventSpec, FunctionSpec,
    ParamDef, ParamLayout, ProtocolDef, ProtocolSpec, SUBSCRIBE_ALL,
};
pub use server::{PeerId, Server, ServerConfig};
pub use shm::{ShmPin, ShmRegistry};
pub use transport::{LoopbackTransport, Transport};
pub use wire::{Message, MessageHeader, OutParam, Param, ParamKind};
