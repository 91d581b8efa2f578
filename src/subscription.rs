// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Subscription handling.
//!
//! A __subscription__ is a named reference to another party's configuration
//! document, e.g., a team-wide repository, plus rules deciding which of its
//! items flow into the local document. Any number of subscriptions can be
//! active at once, and each one is fetched into its own clone by an external
//! collaborator before merging starts.
//!
//! # Merge Pipeline
//!
//! 1. [`resolve`] selects, per subscription and per category, the items that
//!    are "in".
//! 2. [`merge`] drives the selection across every subscription in name order,
//!    unions what can be unioned, and arbitrates keys that several
//!    subscriptions offer with different values.
//! 3. [`apply`] folds the merged result into the local document, where local
//!    values always win.
//! 4. [`state`] remembers what the user has already seen from each
//!    subscription, so only new items get reported next time.

pub mod apply;
pub mod merge;
pub mod resolve;
pub mod state;

pub use merge::{merge_subscriptions, Conflict, MergeReport, MergedResult, Provenance};
pub use state::{FeedState, StateError, SubscriptionState};

use crate::{
    category::{Category, PerCategory},
    config::{ConfigDocument, SubscriptionEntry},
};

use std::collections::BTreeSet;

/// Subscription paired with the document loaded from its clone.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    /// Name of the subscription.
    pub name: String,

    /// Filter and precedence rules.
    pub entry: SubscriptionEntry,

    /// Document checked out of the subscription's repository.
    pub document: ConfigDocument,
}

impl Feed {
    /// Construct new feed.
    pub fn new(name: impl Into<String>, entry: SubscriptionEntry, document: ConfigDocument) -> Self {
        Self {
            name: name.into(),
            entry,
            document,
        }
    }

    /// Select items of every category.
    pub fn selection(&self) -> PerCategory<BTreeSet<String>> {
        let mut selection = PerCategory::default();
        for category in Category::ALL {
            *selection.get_mut(category) = resolve::select(
                &self.entry,
                category,
                &self.document.item_names(category),
            );
        }

        selection
    }
}
