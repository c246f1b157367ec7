// src/status/mod.rs

//! The typed status-message protocol and everything that consumes it.
//!
//! - [`message`] defines the wire schema: timestamped records with a
//!   `status` discriminator and a tolerant extra payload.
//! - [`repo`] is the append-only per-task journal plus derived indexes; the
//!   single source of truth for task observation.
//! - [`server`] is the newline-delimited-JSON status service workers
//!   connect to (TCP or Unix socket).
//! - [`client`] is the worker-side poster with backoff-based reconnection.

pub mod client;
pub mod message;
pub mod repo;
pub mod server;

pub use client::StatusClient;
pub use message::{Message, MessageStatus};
pub use repo::StatusRepo;
pub use server::StatusServer;
