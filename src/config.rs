// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the synchronized configuration document to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use crate::category::Category;

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Current schema version of the configuration document.
pub const DOCUMENT_VERSION: u32 = 1;

/// Synchronized configuration document.
///
/// The one logical document that every machine keeps a copy of. The shared
/// repository holds the canonical copy, the local machine holds a working
/// copy, and subscriptions each contribute a filtered subset of their own
/// copy into the local one.
///
/// # General Layout
///
/// A document is composed of plain name sets (docs, commands, skills), plugin
/// membership, keyed maps (settings, hooks, MCP servers), permission rules,
/// and inline subscription records keyed by subscription name.
///
/// # Invariants
///
/// - A plugin key belongs to at most one plugin partition.
/// - Keyed maps never hold more than one value per key.
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct ConfigDocument {
    /// Schema version tag.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Documentation fragment names.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub docs: BTreeSet<String>,

    /// Command names.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub commands: BTreeSet<String>,

    /// Skill names.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skills: BTreeSet<String>,

    /// Plugin membership split into disjoint partitions.
    #[serde(default, skip_serializing_if = "PluginMembership::is_empty")]
    pub plugins: PluginMembership,

    /// Arbitrary application settings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, toml::Value>,

    /// Permission rules.
    #[serde(default, skip_serializing_if = "Permissions::is_empty")]
    pub permissions: Permissions,

    /// Command-hook bindings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, Payload>,

    /// MCP server definitions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp: BTreeMap<String, Payload>,

    /// Subscriptions keyed by name.
    #[serde(rename = "subscription", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subscriptions: BTreeMap<String, SubscriptionEntry>,
}

impl ConfigDocument {
    /// Check document invariants.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::PluginPartition`] if a plugin key sits in more
    ///   than one plugin partition.
    /// - Return [`ConfigError::SubscriptionName`] if a subscription name
    ///   cannot serve as a directory name.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = self
            .subscriptions
            .keys()
            .find(|name| !is_valid_subscription_name(name))
        {
            return Err(ConfigError::SubscriptionName { name: name.clone() });
        }

        let plugins = &self.plugins;
        for key in plugins.tracked.iter().chain(plugins.pinned.keys()) {
            if plugins.partitions_of(key) > 1 {
                return Err(ConfigError::PluginPartition { key: key.clone() });
            }
        }

        Ok(())
    }

    /// List every item name this document offers for a category.
    ///
    /// Permission rules from both allow and deny lists count as items of the
    /// permissions category. Plugin keys from every partition count as items
    /// of the plugins category.
    pub fn item_names(&self, category: Category) -> BTreeSet<String> {
        match category {
            Category::Settings => self.settings.keys().cloned().collect(),
            Category::Permissions => self.permissions.rules().map(str::to_owned).collect(),
            Category::Hooks => self.hooks.keys().cloned().collect(),
            Category::Mcp => self.mcp.keys().cloned().collect(),
            Category::Plugins => self.plugins.keys(),
            Category::Docs => self.docs.clone(),
            Category::Commands => self.commands.clone(),
            Category::Skills => self.skills.clone(),
        }
    }
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            docs: BTreeSet::new(),
            commands: BTreeSet::new(),
            skills: BTreeSet::new(),
            plugins: PluginMembership::default(),
            settings: BTreeMap::new(),
            permissions: Permissions::default(),
            hooks: BTreeMap::new(),
            mcp: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
        }
    }
}

impl FromStr for ConfigDocument {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let document: ConfigDocument = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;
        document.validate()?;

        Ok(document)
    }
}

impl Display for ConfigDocument {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

// INVARIANT: Subscription names double as directory names under the store.
pub(crate) fn is_valid_subscription_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
}

/// Plugin membership.
///
/// Every plugin key belongs to exactly one of three partitions: tracked
/// upstream, pinned to a specific version, or forked locally.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PluginMembership {
    /// Plugins that follow upstream.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tracked: BTreeSet<String>,

    /// Plugins pinned to a version.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pinned: BTreeMap<String, String>,

    /// Plugins forked into a local copy.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub forked: BTreeSet<String>,
}

impl PluginMembership {
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty() && self.pinned.is_empty() && self.forked.is_empty()
    }

    /// Check if plugin key sits in any partition.
    pub fn contains(&self, key: &str) -> bool {
        self.partitions_of(key) > 0
    }

    /// All plugin keys across partitions.
    pub fn keys(&self) -> BTreeSet<String> {
        self.tracked
            .iter()
            .chain(self.pinned.keys())
            .chain(self.forked.iter())
            .cloned()
            .collect()
    }

    /// Count partitions holding plugin key.
    pub(crate) fn partitions_of(&self, key: &str) -> usize {
        [
            self.tracked.contains(key),
            self.pinned.contains_key(key),
            self.forked.contains(key),
        ]
        .into_iter()
        .filter(|hit| *hit)
        .count()
    }
}

/// Permission rules.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Permissions {
    /// Rules for permitted actions.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allow: BTreeSet<String>,

    /// Rules for forbidden actions.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deny: BTreeSet<String>,
}

impl Permissions {
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    /// Check if rule appears in either list.
    pub fn contains(&self, rule: &str) -> bool {
        self.allow.contains(rule) || self.deny.contains(rule)
    }

    /// Iterate over allow rules followed by deny rules.
    pub fn rules(&self) -> impl Iterator<Item = &str> {
        self.allow.iter().chain(self.deny.iter()).map(String::as_str)
    }
}

/// Opaque serialized value.
///
/// Hook bindings and MCP server definitions are carried around as raw
/// serialized text. Nothing in this crate interprets them. Two payloads are
/// the same if and only if their text is the same.
#[derive(Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    /// Construct new payload from raw serialized text.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Treat payload as raw text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Payload {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Subscription record.
///
/// A named reference to another party's configuration document plus the
/// rules deciding which of its items flow into the local document. The name
/// is the key this record is stored under.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SubscriptionEntry {
    /// Location of the subscription's repository.
    pub source: String,

    /// Pinned reference to check out.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub settings: CategoryFilter,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub permissions: CategoryFilter,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub hooks: CategoryFilter,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub mcp: CategoryFilter,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub plugins: CategoryFilter,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub docs: CategoryFilter,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub commands: CategoryFilter,

    #[serde(default, skip_serializing_if = "CategoryFilter::is_default")]
    pub skills: CategoryFilter,
}

impl SubscriptionEntry {
    /// Construct new subscription that selects nothing yet.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Filter rules of target category.
    pub fn filter(&self, category: Category) -> &CategoryFilter {
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

    /// Mutable filter rules of target category.
    pub fn filter_mut(&mut self, category: Category) -> &mut CategoryFilter {
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

    /// Location of the subscription's repository on this machine.
    ///
    /// The document keeps `source` as written, since it is shared between
    /// machines. Shell expansion happens here, at the point of use.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if `source` names an undefined
    ///   variable.
    pub fn expanded_source(&self) -> Result<String> {
        Ok(shellexpand::full(self.source.as_str())?.into_owned())
    }

    /// Check if subscription claims precedence for item in category.
    pub fn prefers(&self, category: Category, item: &str) -> bool {
        self.filter(category).prefer.iter().any(|name| name == item)
    }
}

/// Selection rules for one category of a subscription.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct CategoryFilter {
    /// Starting point of the selection.
    #[serde(default)]
    pub mode: SelectMode,

    /// Items to pick under [`SelectMode::None`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Items to drop under [`SelectMode::All`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Items this subscription claims precedence for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefer: Vec<String>,
}

impl CategoryFilter {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Starting point of a category selection.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectMode {
    /// Select everything, minus exclusions.
    All,

    /// Select nothing, plus inclusions.
    #[default]
    None,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Plugin key listed in more than one partition.
    #[error("plugin {key:?} belongs to more than one plugin partition")]
    PluginPartition { key: String },

    /// Subscription name cannot serve as a directory name.
    #[error("invalid subscription name {name:?}")]
    SubscriptionName { name: String },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
