// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration synchronization core.
//!
//! Several machines, and several people, each keep their own copy of a
//! structured __configuration document__: settings, permission rules,
//! command hooks, MCP server definitions, plugin membership, documentation
//! fragments, commands, and skills. Copies get edited independently, then
//! reconciled.
//!
//! # Reconciliation
//!
//! - [`merge`] performs a field-wise three-way merge between a common
//!   ancestor, the local working copy, and a diverged remote copy.
//! - [`subscription`] merges any number of independent subscription feeds
//!   into the local document, where local values always win.
//! - [`classify`] splits the changes destined for the installed application
//!   into safe ones and high-risk ones.
//! - [`pending`] parks high-risk changes until the user approves or rejects
//!   them.
//!
//! [`store::Store`] ties these together over the machine-local store
//! directory.

pub mod category;
pub mod change;
pub mod classify;
pub mod config;
pub mod merge;
pub mod path;
pub mod pending;
pub mod store;
pub mod subscription;
pub mod vcs;

pub use category::Category;
pub use config::ConfigDocument;
pub use store::{ConflictPolicy, Store};
