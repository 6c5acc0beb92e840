//! # cojson-core
//!
//! Foundation types shared across the CoJSON engine: the narrow crypto
//! provider interface, typed identifiers, the canonical transaction
//! encoding, error types, causal-ordering time values, and node
//! configuration.
//!
//! This crate has no dependency on `cojson-journal`, `cojson-authorization`,
//! `cojson-sync`, or `cojson-store` — it is the bottom layer the rest of the
//! engine is built on.

#![forbid(unsafe_code)]

pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ids;
pub mod time;

pub use error::{CoJsonError, Result};
