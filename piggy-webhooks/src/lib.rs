//! # Piggy webhooks library
//!
//! Core functionality for the piggy admission mutator and the attested
//! secret server. The `piggy-webhooks` binary wires both behind a single
//! HTTP server.

pub mod config;
pub mod k8s;
pub mod logging;
pub mod mutate;
pub mod server;
pub mod service;
