// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Change classification.
//!
//! Decide which changes may reach the installed application right away, and
//! which ones must wait for explicit approval. The policy is fixed. Settings,
//! documentation fragments, and keybindings are safe. Anything touching
//! permission rules, command hooks, or MCP servers is high risk, because such
//! changes alter what the application is allowed to execute.

use crate::change::{ChangeSet, Delta, SetDelta};

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Area of the installed application a change touches.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub enum ChangeArea {
    Settings,
    Keybindings,
    Docs,
    Permissions,
    Hooks,
    Mcp,
}

impl ChangeArea {
    pub fn risk(&self) -> Risk {
        match self {
            Self::Settings | Self::Keybindings | Self::Docs => Risk::Safe,
            Self::Permissions | Self::Hooks | Self::Mcp => Risk::HighRisk,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Keybindings => "keybindings",
            Self::Docs => "docs",
            Self::Permissions => "permissions",
            Self::Hooks => "hooks",
            Self::Mcp => "mcp",
        }
    }
}

impl Display for ChangeArea {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Risk level of a change.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Risk {
    /// May be applied without asking.
    Safe,

    /// Requires explicit approval.
    HighRisk,
}

/// One classified change.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ClassifiedChange {
    pub area: ChangeArea,
    pub description: String,
}

impl Display for ClassifiedChange {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}: {}", self.area, self.description)
    }
}

/// Changes split by risk level.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ChangeClassification {
    pub safe: Vec<ClassifiedChange>,
    pub high_risk: Vec<ClassifiedChange>,
}

impl ChangeClassification {
    pub fn is_empty(&self) -> bool {
        self.safe.is_empty() && self.high_risk.is_empty()
    }

    pub fn needs_approval(&self) -> bool {
        !self.high_risk.is_empty()
    }

    fn push(&mut self, area: ChangeArea, description: String) {
        let change = ClassifiedChange { area, description };
        match area.risk() {
            Risk::Safe => self.safe.push(change),
            Risk::HighRisk => self.high_risk.push(change),
        }
    }
}

/// Classify every changed item of a change set.
pub fn classify(changes: &ChangeSet) -> ChangeClassification {
    let mut classification = ChangeClassification::default();

    keyed(&mut classification, ChangeArea::Settings, "setting", &changes.settings);
    keyed(&mut classification, ChangeArea::Keybindings, "keybinding", &changes.keybindings);
    named(&mut classification, ChangeArea::Docs, "doc", &changes.docs);
    named(&mut classification, ChangeArea::Permissions, "allow rule", &changes.permissions.allow);
    named(&mut classification, ChangeArea::Permissions, "deny rule", &changes.permissions.deny);
    keyed(&mut classification, ChangeArea::Hooks, "hook", &changes.hooks);
    keyed(&mut classification, ChangeArea::Mcp, "MCP server", &changes.mcp);

    classification
}

fn keyed<V>(
    classification: &mut ChangeClassification,
    area: ChangeArea,
    noun: &str,
    deltas: &BTreeMap<String, Delta<V>>,
) {
    for (key, delta) in deltas {
        classification.push(area, format!("{} {noun} {key:?}", delta.verb()));
    }
}

fn named(classification: &mut ChangeClassification, area: ChangeArea, noun: &str, delta: &SetDelta) {
    for item in &delta.added {
        classification.push(area, format!("add {noun} {item:?}"));
    }

    for item in &delta.removed {
        classification.push(area, format!("remove {noun} {item:?}"));
    }
}

impl ChangeSet {
    /// Split into safe part and high-risk part.
    pub fn split(self) -> (ChangeSet, ChangeSet) {
        let safe = ChangeSet {
            settings: self.settings,
            keybindings: self.keybindings,
            docs: self.docs,
            ..Default::default()
        };
        let high_risk = ChangeSet {
            permissions: self.permissions,
            hooks: self.hooks,
            mcp: self.mcp,
            ..Default::default()
        };

        (safe, high_risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{change::PermissionDelta, config::Payload};
    use pretty_assertions::assert_eq;

    fn permission_added() -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.permissions.allow.added.insert("Bash(git *)".into());
        changes
    }

    fn setting_modified() -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.settings.insert(
            "theme".into(),
            Delta::Modified {
                old: toml::Value::String("light".into()),
                new: toml::Value::String("dark".into()),
            },
        );
        changes
    }

    fn hook_removed() -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.hooks.insert(
            "stop".into(),
            Delta::Removed {
                old: Payload::new("notify"),
            },
        );
        changes
    }

    fn keybinding_added() -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.keybindings.insert(
            "ctrl+k".into(),
            Delta::Added {
                new: "clear".into(),
            },
        );
        changes
    }

    #[simple_test_case::test_case(permission_added(), 0, 1; "permission addition needs approval")]
    #[simple_test_case::test_case(setting_modified(), 1, 0; "setting change is safe")]
    #[simple_test_case::test_case(hook_removed(), 0, 1; "hook removal needs approval")]
    #[simple_test_case::test_case(keybinding_added(), 1, 0; "keybinding change is safe")]
    #[simple_test_case::test_case(ChangeSet::default(), 0, 0; "nothing to classify")]
    #[test]
    fn classify_by_area(changes: ChangeSet, safe: usize, high_risk: usize) {
        let result = classify(&changes);
        pretty_assertions::assert_eq!(result.safe.len(), safe);
        pretty_assertions::assert_eq!(result.high_risk.len(), high_risk);
    }

    #[test]
    fn classify_one_entry_per_item() {
        let mut changes = ChangeSet::default();
        changes.docs.added.insert("style".into());
        changes.docs.removed.insert("legacy".into());
        changes.permissions.deny.removed.insert("Write".into());
        changes.mcp.insert(
            "sentry".into(),
            Delta::Added {
                new: Payload::new("npx sentry"),
            },
        );

        let result = classify(&changes);
        assert_eq!(
            result.safe,
            vec![
                ClassifiedChange {
                    area: ChangeArea::Docs,
                    description: r#"add doc "style""#.into(),
                },
                ClassifiedChange {
                    area: ChangeArea::Docs,
                    description: r#"remove doc "legacy""#.into(),
                },
            ]
        );
        assert_eq!(
            result.high_risk,
            vec![
                ClassifiedChange {
                    area: ChangeArea::Permissions,
                    description: r#"remove deny rule "Write""#.into(),
                },
                ClassifiedChange {
                    area: ChangeArea::Mcp,
                    description: r#"add MCP server "sentry""#.into(),
                },
            ]
        );
        assert!(result.needs_approval());
    }

    #[test]
    fn split_separates_by_risk() {
        let mut changes = setting_modified();
        changes.permissions = PermissionDelta {
            allow: permission_added().permissions.allow,
            ..Default::default()
        };

        let (safe, high_risk) = changes.split();
        assert_eq!(safe, setting_modified());
        assert_eq!(high_risk, permission_added());
        assert!(classify(&safe).high_risk.is_empty());
        assert!(classify(&high_risk).safe.is_empty());
    }
}
