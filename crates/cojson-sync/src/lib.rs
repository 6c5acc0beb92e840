//! # cojson-sync
//!
//! The process-wide node (§4.7): the CoValueCore registry, load/create, and
//! the account identity a node writes through, plus the per-peer sync
//! engine (§4.8) that reconciles sessions between peers over `KNOWN`/
//! `CONTENT`/`LOAD`/`DONE` messages.

#![forbid(unsafe_code)]

pub mod node;
pub mod peer;
pub mod wire;

pub use node::{AccountIdentity, CoValueHandle, Node};
pub use peer::PeerSyncState;
pub use wire::{Content, Done, Known, Load, SessionContent, SyncMessage};
