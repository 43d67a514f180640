//! # Tank State Synchronization Server
//!
//! This library provides the authoritative entity store for the tank game's
//! legacy binary protocol. It receives bit-packed Tank State frames over UDP,
//! decodes them against per-unit-type vitals schemas, reconciles the partial
//! updates into a complete state per tank, and relays the result to the other
//! connected peers.
//!
//! ## Core Responsibilities
//!
//! ### Schema-Dependent Decoding
//! The size of a Tank State frame's vitals block depends on the unit type,
//! which is only carried at the end of the frame. The dispatcher first decodes
//! with the unit type last stored for the entity and falls back to replaying
//! the frame against the unit type read from its tail. A frame that cannot be
//! resolved either way is dropped without touching the store.
//!
//! ### State Reconciliation
//! Every update overwrites position, velocity and flags. Vitals are only
//! replaced when a frame carries them, and the optional vitals fields only
//! when the unit config allows them. Applying the same update twice leaves the
//! same state as applying it once.
//!
//! ### Client Management
//! Handles the lifecycle of peer connections including:
//! - Admission and capacity limits
//! - Association between a connection and the tank it reports
//! - Timeout detection, which releases the peer's tank from the store
//!
//! ## Architecture Design
//!
//! ### Tick Batching
//! Frames received between two ticks are handled together. All frames of a
//! tick are decoded against the store as it stood when the tick started, then
//! merged in arrival order. The store therefore has a single writer and never
//! needs a lock.
//!
//! ### UDP-Based Communication
//! Datagrams may carry an optional big-endian length prefix, which is stripped
//! before the opcode lookup. Outbound frames are sent without it.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking, tank association and timeouts.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Opcode routing, the hint and replay decode strategies, and tick batching.
//!
//! ### Entity Store Module (`entity_store`)
//! The authoritative per-tank state and its merge rules.
//!
//! ### Network Module (`network`)
//! The UDP socket tasks and the tick loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::dispatcher::Dispatcher;
//! use server::network::{Server, ServerConfig};
//! use shared::UnitSchemaRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schemas = Arc::new(UnitSchemaRegistry::load_or_builtin("units.toml")?);
//!     let dispatcher = Dispatcher::new(schemas);
//!
//!     let mut server = Server::new("127.0.0.1:2627", dispatcher, ServerConfig::default()).await?;
//!
//!     // Runs until shutdown:
//!     // - Collects inbound frames and admits new peers
//!     // - Decodes and merges each tick's frames
//!     // - Relays updated tanks to the other peers
//!     // - Releases tanks of peers that went silent
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod dispatcher;
pub mod entity_store;
pub mod error;
pub mod network;
pub mod utils;
