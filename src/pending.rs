// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pending change ledger.
//!
//! High-risk changes never reach the installed application on their own.
//! Instead they get parked in the __pending ledger__, a single-slot TOML file
//! in the store, until the user either approves or rejects them. The ledger
//! is always in one of two states: empty, or holding exactly one batch.
//!
//! Staging a batch while another one is still pending merges the two, so no
//! unapproved change is ever lost. A batch that covers every outstanding
//! change, e.g., a fresh diff against installed state, replaces the pending
//! one instead. Every write replaces the ledger file atomically.

use crate::{
    change::{apply_map, ChangeSet, Delta, PermissionDelta},
    config::{ConfigDocument, Payload},
    path::write_atomic,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    error::Error as StdError,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// Batch of high-risk changes awaiting approval.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PendingChanges {
    /// Revision id the batch originates from.
    #[serde(default)]
    pub revision: String,

    /// Time the batch was staged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "PermissionDelta::is_empty")]
    pub permissions: PermissionDelta,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, Delta<Payload>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp: BTreeMap<String, Delta<Payload>>,
}

impl PendingChanges {
    /// Construct new batch from the high-risk part of a change set.
    ///
    /// Safe changes are left out.
    pub fn from_changes(revision: impl Into<String>, changes: &ChangeSet) -> Self {
        Self {
            revision: revision.into(),
            created_at: Some(Utc::now()),
            permissions: changes.permissions.clone(),
            hooks: changes.hooks.clone(),
            mcp: changes.mcp.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.hooks.is_empty() && self.mcp.is_empty()
    }

    /// Merge newer batch into this one.
    ///
    /// Permission deltas are unioned. For hook and MCP deltas, the newer delta
    /// of a key replaces the older one. Revision and timestamp follow the
    /// newer batch.
    pub fn absorb(&mut self, newer: PendingChanges) {
        self.permissions.merge(&newer.permissions);
        self.hooks.extend(newer.hooks);
        self.mcp.extend(newer.mcp);
        self.revision = newer.revision;
        self.created_at = self.created_at.max(newer.created_at);
    }

    /// Treat batch as change set.
    pub fn to_changes(&self) -> ChangeSet {
        ChangeSet {
            permissions: self.permissions.clone(),
            hooks: self.hooks.clone(),
            mcp: self.mcp.clone(),
            ..Default::default()
        }
    }

    /// Apply batch to a document.
    pub fn apply_to(&self, document: &mut ConfigDocument) {
        self.permissions.apply(&mut document.permissions);
        apply_map(&mut document.hooks, &self.hooks);
        apply_map(&mut document.mcp, &self.mcp);
    }
}

impl FromStr for PendingChanges {
    type Err = toml::de::Error;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data)
    }
}

impl Display for PendingChanges {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(|_| FmtError)?
                .as_str(),
        )
    }
}

/// Outcome of staging a batch.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Staged {
    /// Ledger was empty and now holds the batch.
    Created,

    /// Batch was merged into the one already pending.
    Merged,

    /// Batch took the place of the one already pending.
    Replaced,

    /// Batch was empty, pending one was dropped.
    Cleared,

    /// Batch was empty, ledger left alone.
    Nothing,
}

/// Single-slot ledger file.
#[derive(Debug, Clone)]
pub struct PendingLedger {
    ledger_path: PathBuf,
}

impl PendingLedger {
    /// Construct new ledger at given path.
    ///
    /// Does not touch the file system. A missing ledger file counts as empty.
    pub fn new(ledger_path: impl Into<PathBuf>) -> Self {
        Self {
            ledger_path: ledger_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        self.ledger_path.as_path()
    }

    /// Read pending batch.
    ///
    /// An empty ledger yields an empty batch.
    ///
    /// # Errors
    ///
    /// - Return [`PendingError::ReadLedger`] if ledger file cannot be read.
    /// - Return [`PendingError::ParseLedger`] if ledger file is malformed.
    pub fn read(&self) -> Result<PendingChanges> {
        let data = match fs::read_to_string(&self.ledger_path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PendingChanges::default()),
            Err(err) => {
                return Err(PendingError::ReadLedger {
                    source: err,
                    ledger_path: self.ledger_path.clone(),
                })
            }
        };

        data.parse().map_err(|err| PendingError::ParseLedger {
            source: err,
            ledger_path: self.ledger_path.clone(),
        })
    }

    /// Check if ledger holds a batch.
    pub fn is_pending(&self) -> Result<bool> {
        Ok(!self.read()?.is_empty())
    }

    /// Stage batch of high-risk changes.
    ///
    /// # Errors
    ///
    /// - Return [`PendingError::WriteLedger`] if ledger cannot be written.
    /// - Return any error of [`PendingLedger::read`].
    #[instrument(skip(self, batch), level = "debug")]
    pub fn stage(&self, batch: PendingChanges) -> Result<Staged> {
        if batch.is_empty() {
            debug!("nothing to stage");
            return Ok(Staged::Nothing);
        }

        let mut current = self.read()?;
        let staged = if current.is_empty() {
            current = batch;
            Staged::Created
        } else {
            current.absorb(batch);
            Staged::Merged
        };

        self.write(&current)?;
        info!(
            "staged changes from revision {:?} at {:?}",
            current.revision,
            self.ledger_path.display()
        );

        Ok(staged)
    }

    /// Replace pending batch with a complete one.
    ///
    /// Anything the pending batch holds that `batch` lacks is dropped. An
    /// empty `batch` clears the ledger.
    ///
    /// # Errors
    ///
    /// - Return [`PendingError::WriteLedger`] if ledger cannot be written.
    /// - Return [`PendingError::ClearLedger`] if ledger cannot be cleared.
    /// - Return any error of [`PendingLedger::read`].
    #[instrument(skip(self, batch), level = "debug")]
    pub fn replace(&self, batch: PendingChanges) -> Result<Staged> {
        let pending = self.is_pending()?;
        if batch.is_empty() {
            if !pending {
                debug!("nothing to stage");
                return Ok(Staged::Nothing);
            }

            self.clear()?;
            info!("dropped pending changes no longer asked for");
            return Ok(Staged::Cleared);
        }

        self.write(&batch)?;
        info!(
            "staged changes from revision {:?} at {:?}",
            batch.revision,
            self.ledger_path.display()
        );

        Ok(if pending { Staged::Replaced } else { Staged::Created })
    }

    /// Approve pending batch.
    ///
    /// Hands the batch to `apply`, and clears the ledger if and only if
    /// `apply` succeeds. Returns the approved batch, or `None` if nothing was
    /// pending, in which case `apply` is never called.
    ///
    /// # Errors
    ///
    /// - Return [`PendingError::Apply`] if `apply` fails. Ledger is kept.
    /// - Return [`PendingError::ClearLedger`] if ledger cannot be cleared.
    #[instrument(skip(self, apply), level = "debug")]
    pub fn approve<F, E>(&self, apply: F) -> Result<Option<PendingChanges>>
    where
        F: FnOnce(&PendingChanges) -> std::result::Result<(), E>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let batch = self.read()?;
        if batch.is_empty() {
            debug!("nothing to approve");
            return Ok(None);
        }

        apply(&batch).map_err(|err| PendingError::Apply {
            source: err.into(),
            ledger_path: self.ledger_path.clone(),
        })?;
        self.clear()?;
        info!("approved changes from revision {:?}", batch.revision);

        Ok(Some(batch))
    }

    /// Reject pending batch.
    ///
    /// Returns the discarded batch, or `None` if nothing was pending.
    #[instrument(skip(self), level = "debug")]
    pub fn reject(&self) -> Result<Option<PendingChanges>> {
        let batch = self.read()?;
        if batch.is_empty() {
            debug!("nothing to reject");
            return Ok(None);
        }

        self.clear()?;
        info!("rejected changes from revision {:?}", batch.revision);

        Ok(Some(batch))
    }

    fn write(&self, batch: &PendingChanges) -> Result<()> {
        let data = toml::ser::to_string_pretty(batch).map_err(|err| PendingError::SerializeLedger {
            source: err,
            ledger_path: self.ledger_path.clone(),
        })?;

        write_atomic(&self.ledger_path, data).map_err(|err| PendingError::WriteLedger {
            source: err,
            ledger_path: self.ledger_path.clone(),
        })
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.ledger_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PendingError::ClearLedger {
                source: err,
                ledger_path: self.ledger_path.clone(),
            }),
        }
    }
}

/// Pending ledger error types.
#[derive(Debug, thiserror::Error)]
pub enum PendingError {
    /// Ledger file cannot be read from.
    #[error("failed to read pending ledger at {:?}", ledger_path.display())]
    ReadLedger {
        #[source]
        source: std::io::Error,
        ledger_path: PathBuf,
    },

    /// Ledger file holds malformed data.
    #[error("failed to parse pending ledger at {:?}", ledger_path.display())]
    ParseLedger {
        #[source]
        source: toml::de::Error,
        ledger_path: PathBuf,
    },

    /// Batch cannot be serialized.
    #[error("failed to serialize pending ledger at {:?}", ledger_path.display())]
    SerializeLedger {
        #[source]
        source: toml::ser::Error,
        ledger_path: PathBuf,
    },

    /// Ledger file cannot be written to.
    #[error("failed to write to pending ledger at {:?}", ledger_path.display())]
    WriteLedger {
        #[source]
        source: std::io::Error,
        ledger_path: PathBuf,
    },

    /// Ledger file cannot be removed.
    #[error("failed to clear pending ledger at {:?}", ledger_path.display())]
    ClearLedger {
        #[source]
        source: std::io::Error,
        ledger_path: PathBuf,
    },

    /// Approved batch could not be applied.
    #[error("failed to apply changes pending at {:?}", ledger_path.display())]
    Apply {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
        ledger_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PendingError> = std::result::Result<T, E>;
