// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Fold merged subscription items into the local document.

use crate::{config::ConfigDocument, subscription::MergedResult};

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

impl MergedResult {
    /// Fold merged items into the local document.
    ///
    /// Name sets and permission rules are appended without duplicates. Keyed
    /// items are only inserted when the local document lacks the key. Plugin
    /// keys land in the tracked partition unless some partition already holds
    /// them. Returns number of items inserted.
    pub fn apply_to(&self, document: &mut ConfigDocument) -> usize {
        let mut inserted = 0;

        inserted += append(&mut document.docs, &self.docs);
        inserted += append(&mut document.commands, &self.commands);
        inserted += append(&mut document.skills, &self.skills);
        inserted += append(&mut document.permissions.allow, &self.permissions.allow);
        inserted += append(&mut document.permissions.deny, &self.permissions.deny);

        // INVARIANT: Local keys are never overwritten.
        inserted += insert_absent(&mut document.settings, &self.settings);
        inserted += insert_absent(&mut document.hooks, &self.hooks);
        inserted += insert_absent(&mut document.mcp, &self.mcp);

        for plugin in &self.plugins {
            if !document.plugins.contains(plugin) {
                document.plugins.tracked.insert(plugin.clone());
                inserted += 1;
            }
        }

        debug!("folded {inserted} subscription items into local document");
        inserted
    }
}

fn append(target: &mut BTreeSet<String>, items: &BTreeSet<String>) -> usize {
    items
        .iter()
        .filter(|item| target.insert((*item).clone()))
        .count()
}

fn insert_absent<V: Clone>(target: &mut BTreeMap<String, V>, items: &BTreeMap<String, V>) -> usize {
    let mut inserted = 0;
    for (key, value) in items {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
            inserted += 1;
        }
    }

    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Payload;
    use pretty_assertions::assert_eq;

    #[test]
    fn fold_respects_local_values() {
        let mut document = ConfigDocument::default();
        document.docs.insert("style".into());
        document
            .mcp
            .insert("sentry".into(), Payload::new("local"));
        document.plugins.forked.insert("formatter".into());

        let mut merged = MergedResult::default();
        merged.docs.insert("style".into());
        merged.docs.insert("testing".into());
        merged.permissions.allow.insert("Read".into());
        merged.mcp.insert("sentry".into(), Payload::new("remote"));
        merged.hooks.insert("stop".into(), Payload::new("notify"));
        merged.plugins.insert("formatter".into());
        merged.plugins.insert("notifier".into());

        let inserted = merged.apply_to(&mut document);
        assert_eq!(inserted, 4);
        assert_eq!(document.mcp["sentry"], Payload::new("local"));
        assert_eq!(document.hooks["stop"], Payload::new("notify"));
        assert!(document.docs.contains("testing"));
        assert!(document.permissions.allow.contains("Read"));
        assert!(document.plugins.forked.contains("formatter"));
        assert!(!document.plugins.tracked.contains("formatter"));
        assert!(document.plugins.tracked.contains("notifier"));
        assert!(document.validate().is_ok());
    }

    #[test]
    fn folding_twice_changes_nothing() {
        let mut document = ConfigDocument::default();
        let mut merged = MergedResult::default();
        merged.skills.insert("deploy".into());
        merged
            .settings
            .insert("theme".into(), toml::Value::String("dark".into()));

        assert_eq!(merged.apply_to(&mut document), 2);
        let snapshot = document.clone();
        assert_eq!(merged.apply_to(&mut document), 0);
        assert_eq!(document, snapshot);
    }
}
