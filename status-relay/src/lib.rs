//! TCP status relay.
//!
//! Sources connect to the ingestion endpoint and push binary status frames;
//! the relay acknowledges each one, keeps per-source state and forwards a
//! text summary to every client connected on the broadcast endpoint.
//!
//! - [`codec`] encodes and decodes status and acknowledgement frames.
//! - [`framer`] reads exactly one frame off an async stream.
//! - [`dispatcher`] routes incoming frames to handlers by header byte.
//! - [`registry`] holds sources and their message history.
//! - [`listener`] tracks broadcast clients and fans summaries out to them.
//! - [`server`] binds both endpoints and wires everything together.
//! - [`client`] and [`cli`] drive the relay from the command line.

pub mod cli;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod listener;
pub mod registry;
pub mod server;
pub mod status;
