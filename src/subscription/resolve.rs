// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-category item selection.
//!
//! Every subscription decides, category by category, which of the items its
//! source offers flow into the local document. Selection starts either from
//! everything (`all`) and drops the exclude list, or from nothing (`none`)
//! and picks up the include list. Names on the include list that the source
//! does not offer are ignored.

use crate::{
    category::Category,
    config::{CategoryFilter, SelectMode, SubscriptionEntry},
};

use std::collections::BTreeSet;

/// Select items of one category for a subscription.
pub fn select(
    entry: &SubscriptionEntry,
    category: Category,
    available: &BTreeSet<String>,
) -> BTreeSet<String> {
    select_with(entry.filter(category), available)
}

/// Apply filter rules to the set of available item names.
pub fn select_with(filter: &CategoryFilter, available: &BTreeSet<String>) -> BTreeSet<String> {
    match filter.mode {
        SelectMode::All => available
            .iter()
            .filter(|name| !filter.exclude.contains(*name))
            .cloned()
            .collect(),
        SelectMode::None => filter
            .include
            .iter()
            .filter(|name| available.contains(*name))
            .cloned()
            .collect(),
    }
}
