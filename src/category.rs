// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration categories.
//!
//! A __category__ is one addressable field of a
//! [`ConfigDocument`](crate::config::ConfigDocument). Subscriptions filter,
//! merge, and claim precedence per category, so every piece of logic that
//! needs to reach into the document by category goes through the closed
//! [`Category`] enumeration. Adding a new field to the document means adding
//! a new variant here, and the compiler then points at every `match` that
//! has to learn about it.
//!
//! # Category Kinds
//!
//! Categories come in three flavors that decide how subscriptions merge them:
//!
//! - __Additive__: membership alone is the value, so feeds are unioned.
//! - __Presence__: plugin keys, owned by whichever feed selects them first.
//! - __Keyed__: every key maps to a value, so two feeds can disagree.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Addressable field of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Settings,
    Permissions,
    Hooks,
    Mcp,
    Plugins,
    Docs,
    Commands,
    Skills,
}

impl Category {
    /// Every category, in document order.
    pub const ALL: [Category; 8] = [
        Category::Settings,
        Category::Permissions,
        Category::Hooks,
        Category::Mcp,
        Category::Plugins,
        Category::Docs,
        Category::Commands,
        Category::Skills,
    ];

    /// Name of category as it appears in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Permissions => "permissions",
            Self::Hooks => "hooks",
            Self::Mcp => "mcp",
            Self::Plugins => "plugins",
            Self::Docs => "docs",
            Self::Commands => "commands",
            Self::Skills => "skills",
        }
    }

    /// Determine how subscriptions merge this category.
    pub fn kind(&self) -> CategoryKind {
        match self {
            Self::Permissions | Self::Docs | Self::Commands | Self::Skills => {
                CategoryKind::Additive
            }
            Self::Plugins => CategoryKind::Presence,
            Self::Settings | Self::Hooks | Self::Mcp => CategoryKind::Keyed,
        }
    }
}

impl Display for Category {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == name)
            .ok_or_else(|| UnknownCategory(name.to_owned()))
    }
}

/// Merge behavior of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryKind {
    /// Union across feeds, never conflicts.
    Additive,

    /// First feed to select an item owns it.
    Presence,

    /// Value-bearing keys that can collide.
    Keyed,
}

/// One value per category.
///
/// Used wherever something has to be tracked separately for each category,
/// e.g., accepted items in the subscription state ledger. Empty entries are
/// left out when serialized.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(
    default,
    bound(
        serialize = "T: Serialize + Default + PartialEq",
        deserialize = "T: Deserialize<'de> + Default"
    )
)]
pub struct PerCategory<T> {
    #[serde(skip_serializing_if = "is_default")]
    pub settings: T,
    #[serde(skip_serializing_if = "is_default")]
    pub permissions: T,
    #[serde(skip_serializing_if = "is_default")]
    pub hooks: T,
    #[serde(skip_serializing_if = "is_default")]
    pub mcp: T,
    #[serde(skip_serializing_if = "is_default")]
    pub plugins: T,
    #[serde(skip_serializing_if = "is_default")]
    pub docs: T,
    #[serde(skip_serializing_if = "is_default")]
    pub commands: T,
    #[serde(skip_serializing_if = "is_default")]
    pub skills: T,
}

impl<T> PerCategory<T> {
    /// Access value of target category.
    pub fn get(&self, category: Category) -> &T {
        match category {
            Category::Settings => &self.settings,
            Category::Permissions => &self.permissions,
            Category::Hooks => &self.hooks,
            Category::Mcp => &self.mcp,
            Category::Plugins => &self.plugins,
            Category::Docs => &self.docs,
            Category::Commands => &self.commands,
            Category::Skills => &self.skills,
        }
    }

    /// Mutably access value of target category.
    pub fn get_mut(&mut self, category: Category) -> &mut T {
        match category {
            Category::Settings => &mut self.settings,
            Category::Permissions => &mut self.permissions,
            Category::Hooks => &mut self.hooks,
            Category::Mcp => &mut self.mcp,
            Category::Plugins => &mut self.plugins,
            Category::Docs => &mut self.docs,
            Category::Commands => &mut self.commands,
            Category::Skills => &mut self.skills,
        }
    }

    /// Iterate over every category alongside its value.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &T)> {
        Category::ALL
            .into_iter()
            .map(move |category| (category, self.get(category)))
    }
}

impl<T: Default + PartialEq> PerCategory<T> {
    /// Check if every category holds its default value.
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, value)| is_default(value))
    }
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Category name does not exist.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown category {0:?}")]
pub struct UnknownCategory(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    #[test]
    fn category_name_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.to_string().parse::<Category>(), Ok(category));
        }
    }

    #[test]
    fn reject_unknown_category() {
        assert_eq!(
            "keybindings".parse::<Category>(),
            Err(UnknownCategory("keybindings".into()))
        );
    }

    #[test]
    fn category_kinds() {
        let additive = [
            Category::Permissions,
            Category::Docs,
            Category::Commands,
            Category::Skills,
        ];
        for category in Category::ALL {
            let expect = match category {
                Category::Plugins => CategoryKind::Presence,
                Category::Settings | Category::Hooks | Category::Mcp => CategoryKind::Keyed,
                _ => CategoryKind::Additive,
            };
            assert_eq!(category.kind(), expect);
            assert_eq!(additive.contains(&category), expect == CategoryKind::Additive);
        }
    }

    #[test]
    fn per_category_skips_empty_entries() -> anyhow::Result<()> {
        let mut items: PerCategory<BTreeSet<String>> = PerCategory::default();
        assert!(items.is_empty());

        items.get_mut(Category::Mcp).insert("sentry".into());
        let result = toml::ser::to_string(&items)?;
        assert_eq!(result, "mcp = [\"sentry\"]\n");

        let parsed: PerCategory<BTreeSet<String>> = toml::de::from_str(&result)?;
        assert_eq!(parsed, items);
        assert!(!parsed.is_empty());

        Ok(())
    }
}
