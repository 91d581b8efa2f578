// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Structured deltas between installed state and desired document.
//!
//! Whatever application consumes the document keeps its own installed copy
//! of the synchronized fields. A [`ChangeSet`] describes what has to happen
//! to that installed copy so it matches the desired document. Scanning the
//! installed application is left to the caller, who hands its findings over
//! as a plain [`ConfigDocument`] snapshot.

use crate::config::{ConfigDocument, Payload, Permissions};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Change to a single keyed value.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Delta<V> {
    /// Key is new.
    Added { new: V },

    /// Key is gone.
    Removed { old: V },

    /// Key holds a different value.
    Modified { old: V, new: V },
}

impl<V> Delta<V> {
    /// Value that the key should hold afterwards, if any.
    pub fn target(&self) -> Option<&V> {
        match self {
            Self::Added { new } | Self::Modified { new, .. } => Some(new),
            Self::Removed { .. } => None,
        }
    }

    /// Short verb describing the kind of change.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Added { .. } => "add",
            Self::Removed { .. } => "remove",
            Self::Modified { .. } => "modify",
        }
    }
}

/// Compute per-key deltas that turn `installed` into `desired`.
pub fn diff_maps<V>(
    installed: &BTreeMap<String, V>,
    desired: &BTreeMap<String, V>,
) -> BTreeMap<String, Delta<V>>
where
    V: Clone + PartialEq,
{
    let mut deltas = BTreeMap::new();

    for (key, new) in desired {
        match installed.get(key) {
            None => {
                deltas.insert(key.clone(), Delta::Added { new: new.clone() });
            }
            Some(old) if old != new => {
                deltas.insert(
                    key.clone(),
                    Delta::Modified {
                        old: old.clone(),
                        new: new.clone(),
                    },
                );
            }
            Some(_) => (),
        }
    }

    for (key, old) in installed {
        if !desired.contains_key(key) {
            deltas.insert(key.clone(), Delta::Removed { old: old.clone() });
        }
    }

    deltas
}

/// Apply per-key deltas to a map.
pub fn apply_map<V: Clone>(target: &mut BTreeMap<String, V>, deltas: &BTreeMap<String, Delta<V>>) {
    for (key, delta) in deltas {
        match delta.target() {
            Some(value) => {
                target.insert(key.clone(), value.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}

/// Change to a plain name set.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SetDelta {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub added: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub removed: BTreeSet<String>,
}

impl SetDelta {
    /// Compute delta that turns `installed` into `desired`.
    pub fn between(installed: &BTreeSet<String>, desired: &BTreeSet<String>) -> Self {
        Self {
            added: desired.difference(installed).cloned().collect(),
            removed: installed.difference(desired).cloned().collect(),
        }
    }

    /// Apply delta to a set.
    pub fn apply(&self, target: &mut BTreeSet<String>) {
        target.retain(|item| !self.removed.contains(item));
        target.extend(self.added.iter().cloned());
    }

    /// Merge newer delta into this one.
    ///
    /// Both deltas are unioned. An item that the newer delta moves in the
    /// opposite direction follows the newer delta.
    pub fn merge(&mut self, newer: &SetDelta) {
        for item in &newer.added {
            self.removed.remove(item);
            self.added.insert(item.clone());
        }

        for item in &newer.removed {
            self.added.remove(item);
            self.removed.insert(item.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Change to permission rules.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PermissionDelta {
    #[serde(default, skip_serializing_if = "SetDelta::is_empty")]
    pub allow: SetDelta,

    #[serde(default, skip_serializing_if = "SetDelta::is_empty")]
    pub deny: SetDelta,
}

impl PermissionDelta {
    pub fn between(installed: &Permissions, desired: &Permissions) -> Self {
        Self {
            allow: SetDelta::between(&installed.allow, &desired.allow),
            deny: SetDelta::between(&installed.deny, &desired.deny),
        }
    }

    pub fn apply(&self, target: &mut Permissions) {
        self.allow.apply(&mut target.allow);
        self.deny.apply(&mut target.deny);
    }

    pub fn merge(&mut self, newer: &PermissionDelta) {
        self.allow.merge(&newer.allow);
        self.deny.merge(&newer.deny);
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Every change needed to bring installed state in line with desired document.
///
/// Keybindings live outside of [`ConfigDocument`]. Callers that track them
/// fill in [`ChangeSet::keybindings`] themselves, e.g., through
/// [`diff_maps`].
#[derive(Default, Debug, PartialEq, Clone)]
pub struct ChangeSet {
    pub settings: BTreeMap<String, Delta<toml::Value>>,
    pub keybindings: BTreeMap<String, Delta<String>>,
    pub docs: SetDelta,
    pub permissions: PermissionDelta,
    pub hooks: BTreeMap<String, Delta<Payload>>,
    pub mcp: BTreeMap<String, Delta<Payload>>,
}

impl ChangeSet {
    /// Compute changes that turn `installed` into `desired`.
    pub fn between(installed: &ConfigDocument, desired: &ConfigDocument) -> Self {
        Self {
            settings: diff_maps(&installed.settings, &desired.settings),
            keybindings: BTreeMap::new(),
            docs: SetDelta::between(&installed.docs, &desired.docs),
            permissions: PermissionDelta::between(&installed.permissions, &desired.permissions),
            hooks: diff_maps(&installed.hooks, &desired.hooks),
            mcp: diff_maps(&installed.mcp, &desired.mcp),
        }
    }

    /// Apply changes to a document.
    ///
    /// Keybinding changes have no place in the document and are left alone.
    pub fn apply_to(&self, document: &mut ConfigDocument) {
        apply_map(&mut document.settings, &self.settings);
        self.docs.apply(&mut document.docs);
        self.permissions.apply(&mut document.permissions);
        apply_map(&mut document.hooks, &self.hooks);
        apply_map(&mut document.mcp, &self.mcp);
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
            && self.keybindings.is_empty()
            && self.docs.is_empty()
            && self.permissions.is_empty()
            && self.hooks.is_empty()
            && self.mcp.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn payloads(items: &[(&str, &str)]) -> BTreeMap<String, Payload> {
        items
            .iter()
            .map(|(key, value)| (key.to_string(), Payload::new(*value)))
            .collect()
    }

    #[test]
    fn diff_maps_reports_every_kind_of_change() {
        let installed = payloads(&[("stop", "notify"), ("start", "greet"), ("idle", "nap")]);
        let desired = payloads(&[("stop", "notify"), ("start", "wave"), ("lint", "clippy")]);

        let result = diff_maps(&installed, &desired);
        let mut expect = BTreeMap::new();
        expect.insert(
            "start".to_string(),
            Delta::Modified {
                old: Payload::new("greet"),
                new: Payload::new("wave"),
            },
        );
        expect.insert(
            "lint".to_string(),
            Delta::Added {
                new: Payload::new("clippy"),
            },
        );
        expect.insert(
            "idle".to_string(),
            Delta::Removed {
                old: Payload::new("nap"),
            },
        );
        assert_eq!(result, expect);

        let mut target = installed.clone();
        apply_map(&mut target, &result);
        assert_eq!(target, desired);
    }

    #[test]
    fn set_delta_merge_follows_newer_direction() {
        let mut older = SetDelta {
            added: names(&["Bash(git *)", "Read"]),
            removed: names(&["Write"]),
        };
        let newer = SetDelta {
            added: names(&["Write"]),
            removed: names(&["Read"]),
        };

        older.merge(&newer);
        assert_eq!(older.added, names(&["Bash(git *)", "Write"]));
        assert_eq!(older.removed, names(&["Read"]));
    }

    #[test]
    fn change_set_brings_installed_in_line_with_desired() {
        let mut installed = ConfigDocument::default();
        installed.docs = names(&["style"]);
        installed.permissions.allow = names(&["Read"]);
        installed.hooks = payloads(&[("stop", "notify")]);
        installed
            .settings
            .insert("theme".into(), toml::Value::String("light".into()));

        let mut desired = installed.clone();
        desired.docs = names(&["style", "testing"]);
        desired.permissions.deny = names(&["Bash(rm *)"]);
        desired.hooks.clear();
        desired.mcp = payloads(&[("sentry", "npx sentry")]);
        desired
            .settings
            .insert("theme".into(), toml::Value::String("dark".into()));

        let changes = ChangeSet::between(&installed, &desired);
        assert!(!changes.is_empty());
        assert!(changes.keybindings.is_empty());
        assert_eq!(changes.docs.added, names(&["testing"]));
        assert_eq!(changes.permissions.deny.added, names(&["Bash(rm *)"]));

        let mut result = installed.clone();
        changes.apply_to(&mut result);
        assert_eq!(result, desired);
        assert!(ChangeSet::between(&desired, &result).is_empty());
    }
}
