//! Channel-based pub/sub relay over plain TCP.
//!
//! Clients send newline-delimited frames naming a channel; the relay fans
//! each text or file frame out to every other subscriber of that channel.
//! Each module focuses on a concrete responsibility:
//!
//! - [`frame`] decodes and encodes the line protocol, including the
//!   base64 file payloads, plus helpers for bounded async line reads.
//! - [`connection`] wraps the shared, lock-serialized write side of a client.
//! - [`registry`] tracks live connections and per-channel subscribers and
//!   performs broadcasts.
//! - [`dispatcher`] runs the per-connection read loop.
//! - [`server`] accepts TCP connections and spawns a task for each one.
//! - [`config`] and [`cli`] hold relay options and the command-line interface.
//! - [`client`] sends a single message or file, or receives on a channel.
//!
//! Integration tests drive a real relay over TCP with this crate directly.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod frame;
pub mod registry;
pub mod server;
