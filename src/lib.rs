//! A minimal, schema-driven Protocol Buffers wire-format runtime.
//!
//! Unlike a codegen'd protobuf crate, there is no per-message Rust struct:
//! a [`schema::DefPool`] describes messages/fields/enums at runtime, a
//! [`minitable::MiniTable`] projects one message def into the flat form the
//! decoder actually dispatches on, and [`message::Message`] is a single
//! type-erased, arena-allocated struct whose field layout is whatever
//! [`schema::message::compute_layout`] computed for that particular
//! message. [`decode::decode`]/[`encode::encode`] convert between that
//! runtime representation and the wire format.
//!
//! ```text
//! DefPoolBuilder -> freeze() -> DefPool -> MessageDef -> MiniTable::build()
//!                                                              |
//!                          decode(bytes, &mut Message, &MiniTable, ...)
//! ```
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(feature = "nightly", feature(allocator_api))]

extern crate alloc;

pub mod arena;
mod hash;
mod refcount;
pub mod schema;
pub mod minitable;
pub mod message;
pub mod wire;
pub mod decode;
pub mod fastdecode;
pub mod encode;
pub mod compare;
pub mod error;
pub mod utils;

pub use arena::{Arena, StandaloneArena};
pub use compare::{unknown_fields_equal, UnknownCompareResult};
pub use decode::{decode, DecodeOptions};
pub use encode::encode;
pub use error::{ArenaError, DecodeStatus, DefError};
pub use message::Message;
pub use minitable::MiniTable;
pub use schema::{DefPool, DefPoolBuilder, FieldType, Label, Syntax};
