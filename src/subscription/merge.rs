// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Multi-subscription merge.
//!
//! Drives item selection across every subscription and combines the results
//! into one [`MergedResult`]. Subscriptions are always processed in name
//! order, so the outcome never depends on the order they were handed over.
//!
//! # Arbitration
//!
//! Additive categories are unioned and never conflict. Plugin keys belong to
//! the first subscription that selects them. Keyed categories (settings,
//! hooks, MCP servers) are where subscriptions can disagree:
//!
//! - A key the local document already holds is skipped entirely. Local
//!   always wins.
//! - The first subscription offering a key becomes its owner.
//! - A later subscription offering the same value changes nothing.
//! - A later subscription offering a different value wins only if exactly one
//!   of the two claims precedence through its prefer list. Otherwise both are
//!   reported as a [`Conflict`], and the key is withheld from the merged
//!   result until the prefer lists are fixed.

use crate::{
    category::{Category, CategoryKind, PerCategory},
    config::{ConfigDocument, Payload, Permissions},
    subscription::Feed,
};

use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, info, warn};

/// Combined selection of every subscription.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergedResult {
    pub settings: BTreeMap<String, toml::Value>,
    pub permissions: Permissions,
    pub hooks: BTreeMap<String, Payload>,
    pub mcp: BTreeMap<String, Payload>,
    pub plugins: BTreeSet<String>,
    pub docs: BTreeSet<String>,
    pub commands: BTreeSet<String>,
    pub skills: BTreeSet<String>,

    /// Subscription that supplied each item.
    pub provenance: Provenance,
}

impl MergedResult {
    /// Names of merged items in target category.
    pub fn item_names(&self, category: Category) -> BTreeSet<String> {
        match category {
            Category::Settings => self.settings.keys().cloned().collect(),
            Category::Permissions => self.permissions.rules().map(str::to_owned).collect(),
            Category::Hooks => self.hooks.keys().cloned().collect(),
            Category::Mcp => self.mcp.keys().cloned().collect(),
            Category::Plugins => self.plugins.clone(),
            Category::Docs => self.docs.clone(),
            Category::Commands => self.commands.clone(),
            Category::Skills => self.skills.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL
            .into_iter()
            .all(|category| self.item_names(category).is_empty())
    }
}

/// Record of which subscription supplied each merged item.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Provenance(BTreeMap<Category, BTreeMap<String, String>>);

impl Provenance {
    /// Name of subscription that supplied item.
    pub fn owner(&self, category: Category, item: &str) -> Option<&str> {
        self.0
            .get(&category)
            .and_then(|items| items.get(item))
            .map(String::as_str)
    }

    /// Iterate over items of category alongside their supplier.
    pub fn items(&self, category: Category) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .get(&category)
            .into_iter()
            .flatten()
            .map(|(item, source)| (item.as_str(), source.as_str()))
    }

    fn record(&mut self, category: Category, item: &str, source: &str) {
        self.0
            .entry(category)
            .or_default()
            .insert(item.to_owned(), source.to_owned());
    }

    fn record_first(&mut self, category: Category, item: &str, source: &str) {
        self.0
            .entry(category)
            .or_default()
            .entry(item.to_owned())
            .or_insert_with(|| source.to_owned());
    }
}

/// Keyed item that two subscriptions offer with different values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub category: Category,
    pub item: String,

    /// Subscription that owned the item first.
    pub source_a: String,
    pub value_a: String,

    /// Subscription that challenged the owner.
    pub source_b: String,
    pub value_b: String,
}

impl Display for Conflict {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} item {:?} is offered by {:?} and {:?} with different values, \
             and neither or both claim precedence",
            self.category, self.item, self.source_a, self.source_b
        )
    }
}

/// Outcome of merging subscriptions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeReport {
    /// Merged items, without conflicted keys.
    pub result: MergedResult,

    /// Keys that could not be arbitrated.
    pub conflicts: Vec<Conflict>,

    /// What each subscription selected, keyed by subscription name.
    pub selections: BTreeMap<String, PerCategory<BTreeSet<String>>>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Merge every feed against the local document.
///
/// Feeds are processed in name order regardless of input order. Conflicts
/// are returned alongside the partial result. It is up to the caller to
/// decide whether to proceed with the unconflicted subset.
pub fn merge_subscriptions(
    local: &ConfigDocument,
    feeds: impl IntoIterator<Item = Feed>,
) -> MergeReport {
    let mut feeds: Vec<Feed> = feeds.into_iter().collect();

    // INVARIANT: Merge order is name order, never input order.
    feeds.sort_by(|one, two| one.name.cmp(&two.name));

    let mut merger = SubscriptionMerger::new(local);
    for feed in &feeds {
        merger.absorb(feed);
    }

    merger.finish()
}

struct SubscriptionMerger<'a> {
    local: &'a ConfigDocument,
    result: MergedResult,
    settings: KeyedArbiter<'a, toml::Value>,
    hooks: KeyedArbiter<'a, Payload>,
    mcp: KeyedArbiter<'a, Payload>,
    conflicts: Vec<Conflict>,
    selections: BTreeMap<String, PerCategory<BTreeSet<String>>>,
}

impl<'a> SubscriptionMerger<'a> {
    fn new(local: &'a ConfigDocument) -> Self {
        Self {
            local,
            result: MergedResult::default(),
            settings: KeyedArbiter::new(Category::Settings),
            hooks: KeyedArbiter::new(Category::Hooks),
            mcp: KeyedArbiter::new(Category::Mcp),
            conflicts: Vec::new(),
            selections: BTreeMap::new(),
        }
    }

    fn absorb(&mut self, feed: &'a Feed) {
        debug!("merge subscription {:?}", feed.name);
        let selection = feed.selection();
        let source = feed.name.as_str();

        for category in Category::ALL {
            let picked = selection.get(category);
            match category.kind() {
                CategoryKind::Additive => self.union(feed, category, picked),
                CategoryKind::Presence => {
                    for name in picked {
                        if self.result.plugins.insert(name.clone()) {
                            self.result.provenance.record(category, name, source);
                        } else {
                            debug!("plugin {name:?} already supplied, ignore {source:?}");
                        }
                    }
                }
                CategoryKind::Keyed => self.offer(feed, category, picked),
            }
        }

        self.selections.insert(feed.name.clone(), selection);
    }

    fn union(&mut self, feed: &Feed, category: Category, picked: &BTreeSet<String>) {
        let source = feed.name.as_str();
        let provenance = &mut self.result.provenance;
        let names = match category {
            Category::Permissions => {
                let offered = &feed.document.permissions;
                for rule in picked {
                    if offered.allow.contains(rule) {
                        self.result.permissions.allow.insert(rule.clone());
                    }
                    if offered.deny.contains(rule) {
                        self.result.permissions.deny.insert(rule.clone());
                    }
                    provenance.record_first(category, rule, source);
                }
                return;
            }
            Category::Docs => &mut self.result.docs,
            Category::Commands => &mut self.result.commands,
            // INVARIANT: Skills is the last additive category.
            _ => &mut self.result.skills,
        };

        union_into(names, provenance, category, source, picked);
    }

    fn offer(&mut self, feed: &'a Feed, category: Category, picked: &BTreeSet<String>) {
        let local = self.local;
        let conflicts = &mut self.conflicts;
        match category {
            Category::Settings => {
                self.settings
                    .offer(feed, picked, &feed.document.settings, &local.settings, conflicts)
            }
            Category::Hooks => {
                self.hooks
                    .offer(feed, picked, &feed.document.hooks, &local.hooks, conflicts)
            }
            // INVARIANT: MCP is the last keyed category.
            _ => self.mcp.offer(feed, picked, &feed.document.mcp, &local.mcp, conflicts),
        }
    }

    fn finish(mut self) -> MergeReport {
        let provenance = &mut self.result.provenance;
        self.settings.settle(&mut self.result.settings, provenance);
        self.hooks.settle(&mut self.result.hooks, provenance);
        self.mcp.settle(&mut self.result.mcp, provenance);

        info!(
            "merged {} subscriptions with {} conflicts",
            self.selections.len(),
            self.conflicts.len()
        );

        MergeReport {
            result: self.result,
            conflicts: self.conflicts,
            selections: self.selections,
        }
    }
}

fn union_into(
    names: &mut BTreeSet<String>,
    provenance: &mut Provenance,
    category: Category,
    source: &str,
    picked: &BTreeSet<String>,
) {
    for name in picked {
        names.insert(name.clone());
        provenance.record_first(category, name, source);
    }
}

struct Owner<'a, V> {
    source: &'a str,
    value: &'a V,
    preferred: bool,
}

struct KeyedArbiter<'a, V> {
    category: Category,
    owners: BTreeMap<&'a str, Owner<'a, V>>,
    contested: BTreeSet<&'a str>,
}

impl<'a, V> KeyedArbiter<'a, V>
where
    V: Clone + PartialEq + Display,
{
    fn new(category: Category) -> Self {
        Self {
            category,
            owners: BTreeMap::new(),
            contested: BTreeSet::new(),
        }
    }

    fn offer(
        &mut self,
        feed: &'a Feed,
        picked: &BTreeSet<String>,
        values: &'a BTreeMap<String, V>,
        local: &BTreeMap<String, V>,
        conflicts: &mut Vec<Conflict>,
    ) {
        let category = self.category;
        for (key, value) in values.iter().filter(|(key, _)| picked.contains(*key)) {
            // INVARIANT: Local document always wins, no provenance recorded.
            if local.contains_key(key) {
                debug!("local {category} {key:?} wins over {:?}", feed.name);
                continue;
            }

            let challenger = Owner {
                source: feed.name.as_str(),
                value,
                preferred: feed.entry.prefers(category, key),
            };

            let mut slot = match self.owners.entry(key.as_str()) {
                Entry::Vacant(slot) => {
                    slot.insert(challenger);
                    continue;
                }
                Entry::Occupied(slot) => slot,
            };

            let owner = slot.get_mut();
            if owner.value == challenger.value {
                debug!(
                    "{category} {key:?} from {:?} matches owner {:?}",
                    challenger.source, owner.source
                );
                continue;
            }

            match (owner.preferred, challenger.preferred) {
                (true, false) => {
                    debug!("{category} {key:?} stays with preferred {:?}", owner.source);
                }
                (false, true) => {
                    debug!(
                        "{category} {key:?} moves from {:?} to preferred {:?}",
                        owner.source, challenger.source
                    );
                    *owner = challenger;
                }
                _ => {
                    warn!(
                        "{category} {key:?} conflicts between {:?} and {:?}",
                        owner.source, challenger.source
                    );
                    conflicts.push(Conflict {
                        category,
                        item: key.clone(),
                        source_a: owner.source.to_owned(),
                        value_a: owner.value.to_string(),
                        source_b: challenger.source.to_owned(),
                        value_b: challenger.value.to_string(),
                    });
                    self.contested.insert(key.as_str());
                }
            }
        }
    }

    fn settle(self, target: &mut BTreeMap<String, V>, provenance: &mut Provenance) {
        for (key, owner) in self.owners {
            if self.contested.contains(key) {
                continue;
            }

            target.insert(key.to_owned(), owner.value.clone());
            provenance.record(self.category, key, owner.source);
        }
    }
}
