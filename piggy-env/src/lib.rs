//! # piggy-env
//!
//! The bootstrap agent installed into the shared in-memory volume at
//! admission time. It fetches secret material (through the secret server or
//! directly from the cloud store), substitutes `piggy:<key>` placeholders in
//! the inherited environment and exec-replaces itself with the user command.

pub mod cli;
pub mod env;
pub mod error;
pub mod exec;
pub mod install;
pub mod logging;
pub mod proxy;
pub mod settings;
pub mod standalone;
