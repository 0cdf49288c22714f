//! # loramesh-router
//!
//! Reactive mesh routing core for low-power multi-hop radio networks.
//!
//! Nodes discover routes on demand (flooded route requests answered by
//! unicast replies), keep a user → home-node directory on top of the node
//! routing layer, wrap every frame in a link-level AEAD envelope, and
//! acknowledge unicasts per hop with an implicit-ACK shortcut and a
//! retransmit-then-error policy.
//!
//! ## Task model
//!
//! All mutable routing state lives in [`router::RouterState`], owned
//! exclusively by [`router::router_task`] on a single-threaded Embassy
//! executor. The radio driver, the client bridge and timers communicate
//! with the router only through bounded channels (see [`types`]); the
//! transmit side is drained by [`radio::drive_transmits`] under a
//! carrier-sense backoff policy.

pub mod config;
pub mod crypto;
pub mod error;
pub mod packet;
pub mod ports;
pub mod radio;
pub mod router;
pub mod types;

pub use config::RouterConfig;
pub use error::RouterError;
pub use router::{RouterState, router_task};
