// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Read-only revision access.
//!
//! Subscription clones and the shared repository of the local document are
//! plain Git repositories maintained by external tooling. This module only
//! ever looks at them. It never fetches, commits, or pushes.

use git2::{ErrorCode, Oid, Repository};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Read revisions of a checked-out repository.
pub trait RevisionReader {
    /// Revision id of the commit currently checked out.
    ///
    /// Returns `None` for a repository without any commits.
    fn head(&self, checkout: &Path) -> Result<Option<String>>;

    /// Contents of a file at a revision.
    ///
    /// Returns `None` if the revision does not track the file.
    fn read_file(&self, checkout: &Path, revision: &str, file: &Path) -> Result<Option<String>>;

    /// Best common ancestor of two revisions.
    fn merge_base(&self, checkout: &Path, one: &str, two: &str) -> Result<String>;
}

/// Revision reader backed by libgit2.
#[derive(Default, Debug, Copy, Clone)]
pub struct Git2Revisions;

impl Git2Revisions {
    fn open(&self, checkout: &Path) -> Result<Repository> {
        Repository::open(checkout).map_err(|err| VcsError::Open {
            source: err,
            repo_path: checkout.to_path_buf(),
        })
    }
}

impl RevisionReader for Git2Revisions {
    #[instrument(skip(self, checkout), level = "debug")]
    fn head(&self, checkout: &Path) -> Result<Option<String>> {
        let repository = self.open(checkout)?;
        let head = match repository.head() {
            Ok(head) => head,
            // INVARIANT: Fresh repository has nothing to show yet.
            Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                debug!("no commits at {:?}", checkout.display());
                return Ok(None);
            }
            Err(err) => return Err(resolve_error(err, "HEAD")),
        };

        let commit = head
            .peel_to_commit()
            .map_err(|err| resolve_error(err, "HEAD"))?;

        Ok(Some(commit.id().to_string()))
    }

    #[instrument(skip(self, checkout), level = "debug")]
    fn read_file(&self, checkout: &Path, revision: &str, file: &Path) -> Result<Option<String>> {
        let repository = self.open(checkout)?;
        let commit = resolve(&repository, revision)?;
        let tree = repository
            .find_commit(commit)
            .and_then(|commit| commit.tree())
            .map_err(|err| resolve_error(err, revision))?;

        let entry = match tree.get_path(file) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => {
                debug!("{:?} not tracked at {revision}", file.display());
                return Ok(None);
            }
            Err(err) => return Err(read_error(err, revision, file)),
        };

        let blob = entry
            .to_object(&repository)
            .and_then(|object| object.peel_to_blob())
            .map_err(|err| read_error(err, revision, file))?;

        let data = String::from_utf8(blob.content().to_vec()).map_err(|_| VcsError::NotUtf8 {
            revision: revision.into(),
            file: file.to_path_buf(),
        })?;

        Ok(Some(data))
    }

    #[instrument(skip(self, checkout), level = "debug")]
    fn merge_base(&self, checkout: &Path, one: &str, two: &str) -> Result<String> {
        let repository = self.open(checkout)?;
        let one_id = resolve(&repository, one)?;
        let two_id = resolve(&repository, two)?;
        let base = repository
            .merge_base(one_id, two_id)
            .map_err(|err| VcsError::MergeBase {
                source: err,
                one: one.into(),
                two: two.into(),
            })?;

        Ok(base.to_string())
    }
}

fn resolve(repository: &Repository, revision: &str) -> Result<Oid> {
    repository
        .revparse_single(revision)
        .and_then(|object| object.peel_to_commit())
        .map(|commit| commit.id())
        .map_err(|err| resolve_error(err, revision))
}

fn resolve_error(source: git2::Error, revision: &str) -> VcsError {
    VcsError::Resolve {
        source,
        revision: revision.into(),
    }
}

fn read_error(source: git2::Error, revision: &str, file: &Path) -> VcsError {
    VcsError::Read {
        source,
        revision: revision.into(),
        file: file.to_path_buf(),
    }
}

/// Revision access error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Repository cannot be opened.
    #[error("failed to open repository at {:?}", repo_path.display())]
    Open {
        #[source]
        source: git2::Error,
        repo_path: PathBuf,
    },

    /// Revision does not name a commit.
    #[error("failed to resolve revision {revision:?}")]
    Resolve {
        #[source]
        source: git2::Error,
        revision: String,
    },

    /// File cannot be read at revision.
    #[error("failed to read {:?} at revision {revision:?}", file.display())]
    Read {
        #[source]
        source: git2::Error,
        revision: String,
        file: PathBuf,
    },

    /// File is not valid UTF-8 at revision.
    #[error("{:?} at revision {revision:?} is not valid UTF-8", file.display())]
    NotUtf8 { revision: String, file: PathBuf },

    /// Revisions share no history.
    #[error("failed to find merge base of {one:?} and {two:?}")]
    MergeBase {
        #[source]
        source: git2::Error,
        one: String,
        two: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;
