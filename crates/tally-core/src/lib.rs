//! tally-core - Core library for Tally
//!
//! This crate contains the entry models, the per-user local store, the
//! remote gateways, and the offline sync engine used by all Tally clients.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod kv;
pub mod models;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Entry, EntryId};
pub use service::DataService;
