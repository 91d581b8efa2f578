// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use confsync::{
    category::Category,
    classify::{classify, ChangeClassification},
    config::{ConfigDocument, SelectMode, SubscriptionEntry},
    path::{default_store_dir, write_atomic},
    store::{ConflictPolicy, Store},
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::{
    fs,
    path::{Path, PathBuf},
    process::exit,
    str::FromStr,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "confsync [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to store instead of the default location.
    #[arg(short, long, global = true, value_name = "path")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let store_path = match self.store {
            Some(path) => path,
            None => default_store_dir()?,
        };
        let store = Store::open(store_path)?;

        match self.command {
            Command::Status => run_status(&store),
            Command::Subscribe(opts) => run_subscribe(&store, opts),
            Command::Unsubscribe(opts) => run_unsubscribe(&store, opts),
            Command::Pull(opts) => run_pull(&store, opts),
            Command::News => run_news(&store),
            Command::Reconcile(opts) => run_reconcile(&store, opts),
            Command::Apply(opts) => run_apply(&store, opts),
            Command::Pending => run_pending(&store),
            Command::Approve(opts) => run_approve(&store, opts),
            Command::Reject => run_reject(&store),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show status information about store.
    #[command(override_usage = "confsync status [options]")]
    Status,

    /// Add or replace subscription.
    #[command(override_usage = "confsync subscribe [options] <name> <source>")]
    Subscribe(SubscribeOptions),

    /// Remove subscription along with its clone and state.
    #[command(override_usage = "confsync unsubscribe [options] <name>...")]
    Unsubscribe(UnsubscribeOptions),

    /// Merge every subscription into local document.
    #[command(override_usage = "confsync pull [options]")]
    Pull(PullOptions),

    /// Show items subscriptions offer that were not seen before.
    #[command(override_usage = "confsync news [options]")]
    News,

    /// Reconcile local document with diverged revision of store.
    #[command(override_usage = "confsync reconcile [options] <revision>")]
    Reconcile(ReconcileOptions),

    /// Apply safe changes to installed snapshot, defer high-risk ones.
    #[command(override_usage = "confsync apply [options] --installed <path>")]
    Apply(ApplyOptions),

    /// Show changes awaiting approval.
    #[command(override_usage = "confsync pending [options]")]
    Pending,

    /// Apply pending changes to installed snapshot.
    #[command(override_usage = "confsync approve [options] --installed <path>")]
    Approve(ApproveOptions),

    /// Discard pending changes.
    #[command(override_usage = "confsync reject [options]")]
    Reject,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SubscribeOptions {
    /// Name of subscription.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Location of subscribed repository.
    #[arg(required = true, value_name = "source")]
    pub source: String,

    /// Branch, tag, or commit to follow.
    #[arg(short, long, value_name = "ref")]
    pub reference: Option<String>,

    /// Select every item of category.
    #[arg(short, long, value_name = "category")]
    pub all: Vec<Category>,

    /// Select item explicitly.
    #[arg(short, long, value_name = "category=item")]
    pub include: Vec<Selector>,

    /// Drop item from category selected in full.
    #[arg(short, long, value_name = "category=item")]
    pub exclude: Vec<Selector>,

    /// Claim item when other subscriptions offer it too.
    #[arg(short, long, value_name = "category=item")]
    pub prefer: Vec<Selector>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UnsubscribeOptions {
    /// Name of subscriptions to remove.
    #[arg(required = true, value_name = "name")]
    pub names: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PullOptions {
    /// Leave local document untouched on any conflict.
    #[arg(long)]
    pub halt_on_conflict: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ReconcileOptions {
    /// Revision to reconcile with.
    #[arg(required = true, value_name = "revision")]
    pub revision: String,

    /// Leave local document untouched on any conflict.
    #[arg(long)]
    pub halt_on_conflict: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyOptions {
    /// Snapshot of installed application state.
    #[arg(long, required = true, value_name = "path")]
    pub installed: PathBuf,

    /// Revision to attribute deferred changes to.
    #[arg(short, long, value_name = "revision")]
    pub revision: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApproveOptions {
    /// Snapshot of installed application state.
    #[arg(long, required = true, value_name = "path")]
    pub installed: PathBuf,
}

/// Item of a category given as `category=item`.
#[derive(Clone, Debug)]
struct Selector {
    category: Category,
    item: String,
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let (category, item) = data
            .split_once('=')
            .ok_or_else(|| anyhow!("expect <category>=<item>, got {data:?}"))?;

        if item.is_empty() {
            return Err(anyhow!("missing item in {data:?}"));
        }

        Ok(Self {
            category: category.parse()?,
            item: item.into(),
        })
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_status(store: &Store) -> Result<()> {
    let document = store.load_document()?;
    println!("store: {}", store.path().display());

    if document.subscriptions.is_empty() {
        println!("no subscriptions");
    }

    for (name, entry) in &document.subscriptions {
        let fetched = if store.clone_path(name).is_dir() {
            "fetched"
        } else {
            "not fetched"
        };
        let source = match entry.expanded_source() {
            Ok(source) => source,
            Err(error) => {
                warn!("subscription {name:?}: {error}");
                entry.source.clone()
            }
        };
        match &entry.reference {
            Some(reference) => println!("  {name}: {source} @ {reference} ({fetched})"),
            None => println!("  {name}: {source} ({fetched})"),
        }
    }

    let pending = store.pending()?;
    if pending.is_empty() {
        println!("no changes pending");
    } else {
        let count = classify(&pending.to_changes()).high_risk.len();
        println!("{count} changes pending from revision {}", pending.revision);
    }

    Ok(())
}

fn run_subscribe(store: &Store, opts: SubscribeOptions) -> Result<()> {
    let mut entry = SubscriptionEntry::new(opts.source);
    entry.reference = opts.reference;

    for category in opts.all {
        entry.filter_mut(category).mode = SelectMode::All;
    }

    for selector in opts.include {
        entry.filter_mut(selector.category).include.push(selector.item);
    }

    for selector in opts.exclude {
        entry.filter_mut(selector.category).exclude.push(selector.item);
    }

    for selector in opts.prefer {
        entry.filter_mut(selector.category).prefer.push(selector.item);
    }

    store.subscribe(&opts.name, entry)?;

    Ok(())
}

fn run_unsubscribe(store: &Store, opts: UnsubscribeOptions) -> Result<()> {
    for name in opts.names {
        store.unsubscribe(&name)?;
    }

    Ok(())
}

fn run_pull(store: &Store, opts: PullOptions) -> Result<()> {
    let report = store.pull(policy(opts.halt_on_conflict))?;

    for conflict in &report.conflicts {
        println!("conflict: {conflict}");
    }

    if !report.applied {
        return Err(anyhow!(
            "{} conflicts left local document untouched",
            report.conflicts.len()
        ));
    }

    for (name, news) in &report.news {
        for (category, items) in news.iter() {
            for item in items {
                println!("new from {name}: {category} {item}");
            }
        }
    }

    info!("folded {} items into local document", report.inserted);

    Ok(())
}

fn run_news(store: &Store) -> Result<()> {
    let news = store.whats_new()?;
    if news.is_empty() {
        println!("nothing new");
    }

    for (name, news) in &news {
        println!("{name}:");
        for category in Category::ALL {
            let items = news.get(category);
            if !items.is_empty() {
                let items = items.iter().map(String::as_str).collect::<Vec<_>>();
                println!("  {category}: {}", items.join(", "));
            }
        }
    }

    Ok(())
}

fn run_reconcile(store: &Store, opts: ReconcileOptions) -> Result<()> {
    let merge = store.reconcile(&opts.revision, policy(opts.halt_on_conflict))?;

    for conflict in &merge.conflicts {
        println!("conflict: {conflict}");
    }

    if !merge.is_clean() && opts.halt_on_conflict {
        return Err(anyhow!(
            "{} conflicts left local document untouched",
            merge.conflicts.len()
        ));
    }

    Ok(())
}

fn run_apply(store: &Store, opts: ApplyOptions) -> Result<()> {
    let mut installed = read_installed(&opts.installed)?;
    let revision = match opts.revision {
        Some(revision) => revision,
        None => store.revision().ok().flatten().unwrap_or_else(|| "working-copy".into()),
    };

    let outcome = store.stage_changes(&installed, &revision)?;
    print_classification(&outcome.classification);

    if !outcome.safe.is_empty() {
        outcome.safe.apply_to(&mut installed);
        write_atomic(&opts.installed, installed.to_string())?;
        info!("applied {} safe changes", outcome.classification.safe.len());
    }

    if outcome.classification.needs_approval() {
        warn!("high-risk changes await approval, see `confsync pending`");
    }

    Ok(())
}

fn run_pending(store: &Store) -> Result<()> {
    let pending = store.pending()?;
    if pending.is_empty() {
        println!("no changes pending");
        return Ok(());
    }

    println!("revision: {}", pending.revision);
    if let Some(created_at) = pending.created_at {
        println!("staged at: {created_at}");
    }
    print_classification(&classify(&pending.to_changes()));

    Ok(())
}

fn run_approve(store: &Store, opts: ApproveOptions) -> Result<()> {
    let approved = store.approve(|batch| -> Result<()> {
        let mut installed = read_installed(&opts.installed)?;
        batch.apply_to(&mut installed);
        write_atomic(&opts.installed, installed.to_string())?;
        Ok(())
    })?;

    match approved {
        Some(batch) => info!("approved changes from revision {}", batch.revision),
        None => println!("no changes pending"),
    }

    Ok(())
}

fn run_reject(store: &Store) -> Result<()> {
    match store.reject()? {
        Some(batch) => info!("rejected changes from revision {}", batch.revision),
        None => println!("no changes pending"),
    }

    Ok(())
}

fn policy(halt_on_conflict: bool) -> ConflictPolicy {
    if halt_on_conflict {
        ConflictPolicy::Halt
    } else {
        ConflictPolicy::Proceed
    }
}

fn read_installed(path: &Path) -> Result<ConfigDocument> {
    if !path.exists() {
        return Ok(ConfigDocument::default());
    }

    Ok(fs::read_to_string(path)?.parse()?)
}

fn print_classification(classification: &ChangeClassification) {
    for change in &classification.safe {
        println!("safe: {change}");
    }

    for change in &classification.high_risk {
        println!("needs approval: {change}");
    }
}
