// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Subscription state ledger.
//!
//! Machine-local record of what each subscription looked like the last time
//! it was merged: the revision that was fetched, and the items the user has
//! already seen per category. The merge itself never reads this ledger. It
//! only serves to report what is new since last time.
//!
//! The ledger is never synchronized between machines.

use crate::category::{Category, PerCategory};

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// State of every subscription.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SubscriptionState {
    #[serde(rename = "subscription", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feeds: BTreeMap<String, FeedState>,
}

impl SubscriptionState {
    /// Last fetched revision of subscription.
    pub fn revision(&self, name: &str) -> Option<&str> {
        self.feeds
            .get(name)
            .and_then(|feed| feed.revision.as_deref())
    }

    /// Items in selection that the user has not accepted yet.
    ///
    /// Every item counts as new for a subscription without any state.
    pub fn whats_new(
        &self,
        name: &str,
        selection: &PerCategory<BTreeSet<String>>,
    ) -> PerCategory<BTreeSet<String>> {
        let mut news = PerCategory::default();
        for category in Category::ALL {
            let seen = self.feeds.get(name).map(|feed| feed.accepted.get(category));
            *news.get_mut(category) = selection
                .get(category)
                .iter()
                .filter(|item| !seen.is_some_and(|seen| seen.contains(*item)))
                .cloned()
                .collect();
        }

        news
    }

    /// Record selection of subscription as accepted at given revision.
    pub fn accept(
        &mut self,
        name: impl Into<String>,
        revision: Option<String>,
        selection: &PerCategory<BTreeSet<String>>,
    ) {
        let feed = self.feeds.entry(name.into()).or_default();
        feed.revision = revision;
        for category in Category::ALL {
            feed.accepted
                .get_mut(category)
                .extend(selection.get(category).iter().cloned());
        }
    }

    /// Drop all state of subscription.
    ///
    /// Returns `true` if the subscription had any state.
    pub fn forget(&mut self, name: &str) -> bool {
        self.feeds.remove(name).is_some()
    }
}

impl FromStr for SubscriptionState {
    type Err = StateError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(StateError::Deserialize)
    }
}

impl Display for SubscriptionState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(StateError::Serialize)?
                .as_str(),
        )
    }
}

/// State of one subscription.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct FeedState {
    /// Revision id fetched last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Items already seen per category.
    #[serde(default, skip_serializing_if = "PerCategory::is_empty")]
    pub accepted: PerCategory<BTreeSet<String>>,
}

/// Subscription state error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StateError {
    /// Failed to deserialize subscription state.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize subscription state.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

impl From<StateError> for FmtError {
    fn from(_: StateError) -> Self {
        FmtError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn selection(mcp: &[&str], docs: &[&str]) -> PerCategory<BTreeSet<String>> {
        let mut selection = PerCategory::default();
        selection.mcp = mcp.iter().map(|item| item.to_string()).collect();
        selection.docs = docs.iter().map(|item| item.to_string()).collect();
        selection
    }

    #[test]
    fn unknown_subscription_reports_everything_new() {
        let state = SubscriptionState::default();
        let current = selection(&["sentry"], &["style"]);

        assert_eq!(state.whats_new("team", &current), current);
        assert_eq!(state.revision("team"), None);
    }

    #[test]
    fn accepted_items_are_no_longer_new() {
        let mut state = SubscriptionState::default();
        state.accept("team", Some("abc123".into()), &selection(&["sentry"], &[]));

        let current = selection(&["sentry", "github"], &["style"]);
        assert_eq!(
            state.whats_new("team", &current),
            selection(&["github"], &["style"])
        );
        assert_eq!(state.revision("team"), Some("abc123"));

        assert!(state.forget("team"));
        assert!(!state.forget("team"));
        assert_eq!(state.whats_new("team", &current), current);
    }

    #[test]
    fn parse_subscription_state() -> anyhow::Result<()> {
        let result: SubscriptionState = indoc! {r#"
            [subscription.team]
            revision = "abc123"

            [subscription.team.accepted]
            mcp = ["sentry"]
            docs = ["style"]
        "#}
        .parse()?;

        let mut expect = SubscriptionState::default();
        expect.accept("team", Some("abc123".into()), &selection(&["sentry"], &["style"]));
        assert_eq!(result, expect);

        let reparsed: SubscriptionState = result.to_string().parse()?;
        assert_eq!(reparsed, result);

        Ok(())
    }
}
