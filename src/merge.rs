// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Three-way reconciliation.
//!
//! When local history diverges from the shared repository, the same document
//! has been edited in two places since their common ancestor. Each field is
//! reconciled by comparing both sides to that ancestor, so a change made on
//! one side survives as long as the other side left the field alone.
//!
//! # Set Fields
//!
//! Set fields track what each side __added__ (absent from the ancestor) and
//! __removed__ (present in the ancestor, absent from the side). The merged
//! set is the ancestor plus everything added minus everything removed.
//!
//! # Keyed Fields
//!
//! Keyed fields are reconciled key by key. A key only one side touched takes
//! that side's version. A key both sides touched is accepted when both sides
//! agree, and is a conflict otherwise. A conflicted key keeps its ancestor
//! value, so conflicting additions stay out of the merged map until someone
//! resolves them by hand.

use crate::config::{ConfigDocument, Permissions, PluginMembership};

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, warn};

/// Merged value with the keys that could not be reconciled.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Merged<T> {
    pub value: T,
    pub conflicts: BTreeSet<String>,
}

impl<T> Merged<T> {
    /// Check if merge finished without conflicts.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Three-way merge of a set field.
pub fn merge_sets(
    base: &BTreeSet<String>,
    local: &BTreeSet<String>,
    remote: &BTreeSet<String>,
) -> Merged<BTreeSet<String>> {
    let local_added: BTreeSet<&String> = local.difference(base).collect();
    let local_removed: BTreeSet<&String> = base.difference(local).collect();
    let remote_added: BTreeSet<&String> = remote.difference(base).collect();
    let remote_removed: BTreeSet<&String> = base.difference(remote).collect();

    // INVARIANT: Added items never existed in the ancestor while removed items
    // always did, so these intersections stay empty for plain sets.
    let conflicts: BTreeSet<String> = local_added
        .intersection(&remote_removed)
        .chain(remote_added.intersection(&local_removed))
        .map(|item| (*item).clone())
        .collect();

    let mut value: BTreeSet<String> = base
        .iter()
        .chain(local_added.iter().copied())
        .chain(remote_added.iter().copied())
        .filter(|item| !local_removed.contains(item) && !remote_removed.contains(item))
        .cloned()
        .collect();

    // INVARIANT: A conflicted item keeps its ancestor membership.
    for item in &conflicts {
        if base.contains(item) {
            value.insert(item.clone());
        } else {
            value.remove(item);
        }
    }

    Merged { value, conflicts }
}

/// Three-way merge of a keyed field.
///
/// Values are only compared for equality, never interpreted.
pub fn merge_maps<V>(
    base: &BTreeMap<String, V>,
    local: &BTreeMap<String, V>,
    remote: &BTreeMap<String, V>,
) -> Merged<BTreeMap<String, V>>
where
    V: Clone + PartialEq,
{
    let keys: BTreeSet<&String> = base.keys().chain(local.keys()).chain(remote.keys()).collect();
    let mut merged = Merged {
        value: BTreeMap::new(),
        conflicts: BTreeSet::new(),
    };

    for key in keys {
        let resolution = resolve_key(base.get(key), local.get(key), remote.get(key));
        let kept = match resolution {
            KeyResolution::Resolved(kept) => kept,
            KeyResolution::Conflict(ancestor) => {
                merged.conflicts.insert(key.clone());
                ancestor
            }
        };

        if let Some(value) = kept {
            merged.value.insert(key.clone(), value.clone());
        }
    }

    merged
}

enum KeyResolution<'a, V> {
    Resolved(Option<&'a V>),
    Conflict(Option<&'a V>),
}

fn resolve_key<'a, V: PartialEq>(
    ancestor: Option<&'a V>,
    local: Option<&'a V>,
    remote: Option<&'a V>,
) -> KeyResolution<'a, V> {
    match (local != ancestor, remote != ancestor) {
        (false, false) => KeyResolution::Resolved(ancestor),
        (true, false) => KeyResolution::Resolved(local),
        (false, true) => KeyResolution::Resolved(remote),
        // Same add, same modification, or both removed.
        (true, true) if local == remote => KeyResolution::Resolved(local),
        (true, true) => KeyResolution::Conflict(ancestor),
    }
}

/// Field of a document that failed to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldConflict {
    /// Dotted path of the field, e.g., "permissions.allow".
    pub field: &'static str,

    /// Item or key that conflicted.
    pub key: String,
}

impl Display for FieldConflict {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}: {}", self.field, self.key)
    }
}

/// Result of reconciling whole documents.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMerge {
    pub document: ConfigDocument,
    pub conflicts: Vec<FieldConflict>,
}

impl DocumentMerge {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Three-way merge of every field of a configuration document.
///
/// Plugin partitions are merged independently. A plugin key that ends up in
/// more than one partition is reported under "plugins" and keeps its
/// ancestor placement. The version tag merges to the newest of both sides.
pub fn merge_documents(
    base: &ConfigDocument,
    local: &ConfigDocument,
    remote: &ConfigDocument,
) -> DocumentMerge {
    let mut conflicts = Vec::new();
    let mut collect = |field: &'static str, keys: BTreeSet<String>| {
        conflicts.extend(keys.into_iter().map(|key| FieldConflict { field, key }));
    };

    let docs = merge_sets(&base.docs, &local.docs, &remote.docs);
    collect("docs", docs.conflicts);
    let commands = merge_sets(&base.commands, &local.commands, &remote.commands);
    collect("commands", commands.conflicts);
    let skills = merge_sets(&base.skills, &local.skills, &remote.skills);
    collect("skills", skills.conflicts);

    let allow = merge_sets(
        &base.permissions.allow,
        &local.permissions.allow,
        &remote.permissions.allow,
    );
    collect("permissions.allow", allow.conflicts);
    let deny = merge_sets(
        &base.permissions.deny,
        &local.permissions.deny,
        &remote.permissions.deny,
    );
    collect("permissions.deny", deny.conflicts);

    let settings = merge_maps(&base.settings, &local.settings, &remote.settings);
    collect("settings", settings.conflicts);
    let hooks = merge_maps(&base.hooks, &local.hooks, &remote.hooks);
    collect("hooks", hooks.conflicts);
    let mcp = merge_maps(&base.mcp, &local.mcp, &remote.mcp);
    collect("mcp", mcp.conflicts);
    let subscriptions = merge_maps(
        &base.subscriptions,
        &local.subscriptions,
        &remote.subscriptions,
    );
    collect("subscription", subscriptions.conflicts);

    let plugins = merge_plugins(&base.plugins, &local.plugins, &remote.plugins);
    collect("plugins", plugins.conflicts);

    let mut document = ConfigDocument {
        version: local.version.max(remote.version),
        docs: docs.value,
        commands: commands.value,
        skills: skills.value,
        plugins: plugins.value,
        settings: settings.value,
        permissions: Permissions {
            allow: allow.value,
            deny: deny.value,
        },
        hooks: hooks.value,
        mcp: mcp.value,
        subscriptions: subscriptions.value,
    };

    // INVARIANT: Plugin partitions stay disjoint after merging.
    let overlapping: Vec<String> = document
        .plugins
        .keys()
        .into_iter()
        .filter(|key| document.plugins.partitions_of(key) > 1)
        .collect();
    for key in overlapping {
        restore_placement(&mut document.plugins, &base.plugins, &key);
        conflicts.push(FieldConflict {
            field: "plugins",
            key,
        });
    }

    conflicts.sort();
    conflicts.dedup();
    for conflict in &conflicts {
        warn!("cannot reconcile {conflict}");
    }
    debug!("three-way merge finished with {} conflicts", conflicts.len());

    DocumentMerge {
        document,
        conflicts,
    }
}

fn merge_plugins(
    base: &PluginMembership,
    local: &PluginMembership,
    remote: &PluginMembership,
) -> Merged<PluginMembership> {
    let tracked = merge_sets(&base.tracked, &local.tracked, &remote.tracked);
    let pinned = merge_maps(&base.pinned, &local.pinned, &remote.pinned);
    let forked = merge_sets(&base.forked, &local.forked, &remote.forked);

    Merged {
        value: PluginMembership {
            tracked: tracked.value,
            pinned: pinned.value,
            forked: forked.value,
        },
        conflicts: tracked
            .conflicts
            .into_iter()
            .chain(pinned.conflicts)
            .chain(forked.conflicts)
            .collect(),
    }
}

fn restore_placement(plugins: &mut PluginMembership, base: &PluginMembership, key: &str) {
    plugins.tracked.remove(key);
    plugins.pinned.remove(key);
    plugins.forked.remove(key);

    if base.tracked.contains(key) {
        plugins.tracked.insert(key.to_owned());
    }
    if let Some(version) = base.pinned.get(key) {
        plugins.pinned.insert(key.to_owned(), version.clone());
    }
    if base.forked.contains(key) {
        plugins.forked.insert(key.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Payload;
    use pretty_assertions::assert_eq;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, Payload> {
        entries
            .iter()
            .map(|(key, raw)| (key.to_string(), Payload::new(*raw)))
            .collect()
    }

    #[test]
    fn set_merge_keeps_both_sides_changes() {
        let base = set(&["Read", "Edit"]);
        let local = set(&["Read", "Edit", "Write"]);
        let remote = set(&["Read"]);

        let result = merge_sets(&base, &local, &remote);
        assert_eq!(result.value, set(&["Read", "Write"]));
        assert!(result.is_clean());
    }

    #[test]
    fn set_merge_both_sides_remove_and_add_same_item() {
        let base = set(&["Read", "Edit"]);
        let local = set(&["Read", "Grep"]);
        let remote = set(&["Read", "Grep"]);

        let result = merge_sets(&base, &local, &remote);
        assert_eq!(result.value, set(&["Grep", "Read"]));
        assert!(result.is_clean());
    }

    #[test]
    fn map_merge_one_sided_changes_apply() {
        let base = map(&[("a", "1"), ("b", "1"), ("c", "1")]);
        let local = map(&[("a", "2"), ("b", "1"), ("c", "1"), ("d", "1")]);
        let remote = map(&[("a", "1"), ("c", "1")]);

        let result = merge_maps(&base, &local, &remote);
        assert_eq!(result.value, map(&[("a", "2"), ("c", "1"), ("d", "1")]));
        assert!(result.is_clean());
    }

    #[test]
    fn map_merge_agreeing_changes_are_accepted() {
        let base = map(&[("gone", "1"), ("edit", "1")]);
        let local = map(&[("edit", "2"), ("new", "x")]);
        let remote = map(&[("edit", "2"), ("new", "x")]);

        let result = merge_maps(&base, &local, &remote);
        assert_eq!(result.value, map(&[("edit", "2"), ("new", "x")]));
        assert!(result.is_clean());
    }

    #[test]
    fn map_merge_differing_additions_stay_out() {
        let base = map(&[]);
        let local = map(&[("sentry", "local")]);
        let remote = map(&[("sentry", "remote")]);

        let result = merge_maps(&base, &local, &remote);
        assert_eq!(result.value, map(&[]));
        assert_eq!(result.conflicts, set(&["sentry"]));
    }

    #[test]
    fn map_merge_differing_modifications_keep_ancestor() {
        let base = map(&[("sentry", "base")]);
        let local = map(&[("sentry", "local")]);
        let remote = map(&[("sentry", "remote")]);

        let result = merge_maps(&base, &local, &remote);
        assert_eq!(result.value, map(&[("sentry", "base")]));
        assert_eq!(result.conflicts, set(&["sentry"]));
    }

    #[test]
    fn map_merge_modify_against_remove_keeps_ancestor() {
        let base = map(&[("sentry", "base")]);
        let local = map(&[]);
        let remote = map(&[("sentry", "remote")]);

        let result = merge_maps(&base, &local, &remote);
        assert_eq!(result.value, map(&[("sentry", "base")]));
        assert_eq!(result.conflicts, set(&["sentry"]));
    }

    #[test]
    fn document_merge_reconciles_every_field() {
        let mut base = ConfigDocument::default();
        base.permissions.allow = set(&["Read", "Edit"]);
        base.settings
            .insert("theme".into(), toml::Value::String("light".into()));
        base.docs = set(&["style"]);

        let mut local = base.clone();
        local.permissions.allow.insert("Write".into());
        local
            .settings
            .insert("theme".into(), toml::Value::String("dark".into()));
        local.plugins.tracked.insert("formatter".into());

        let mut remote = base.clone();
        remote.permissions.allow.remove("Edit");
        remote.docs.insert("testing".into());
        remote
            .mcp
            .insert("sentry".into(), Payload::new(r#"{"command":"sentry"}"#));
        remote.version = 2;

        let result = merge_documents(&base, &local, &remote);
        assert!(result.is_clean());

        let document = result.document;
        assert_eq!(document.version, 2);
        assert_eq!(document.permissions.allow, set(&["Read", "Write"]));
        assert_eq!(document.docs, set(&["style", "testing"]));
        assert_eq!(
            document.settings["theme"],
            toml::Value::String("dark".into())
        );
        assert_eq!(document.plugins.tracked, set(&["formatter"]));
        assert!(document.mcp.contains_key("sentry"));
    }

    #[test]
    fn document_merge_reports_conflicts_by_field() {
        let base = ConfigDocument::default();
        let mut local = base.clone();
        local.hooks.insert("stop".into(), Payload::new("a"));
        let mut remote = base.clone();
        remote.hooks.insert("stop".into(), Payload::new("b"));

        let result = merge_documents(&base, &local, &remote);
        assert_eq!(
            result.conflicts,
            vec![FieldConflict {
                field: "hooks",
                key: "stop".into()
            }]
        );
        assert!(result.document.hooks.is_empty());
    }

    #[test]
    fn document_merge_keeps_plugin_partitions_disjoint() {
        let mut base = ConfigDocument::default();
        base.plugins.tracked.insert("formatter".into());

        // Local pins the plugin while remote forks it.
        let mut local = base.clone();
        local.plugins.tracked.clear();
        local
            .plugins
            .pinned
            .insert("formatter".into(), "1.0.0".into());
        let mut remote = base.clone();
        remote.plugins.tracked.clear();
        remote.plugins.forked.insert("formatter".into());

        let result = merge_documents(&base, &local, &remote);
        assert_eq!(
            result.conflicts,
            vec![FieldConflict {
                field: "plugins",
                key: "formatter".into()
            }]
        );
        assert_eq!(result.document.plugins, base.plugins);
        assert!(result.document.validate().is_ok());
    }
}
