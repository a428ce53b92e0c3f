//! Core type definitions for the document store.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Property assignment where `None` removes the property.
pub type PropertyUpdate = (String, Option<String>);

/// Outcome of a listener callback. Failures are logged, never propagated.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Returns the current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Opaque, store-unique node identifier.
///
/// A node keeps its id across all versions of a store, which is what lets
/// synchronization match source and target nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Returns true if `alias` is a well-formed node alias.
///
/// Aliases start with a letter, digit or underscore and continue with
/// letters, digits, `_` or `-`.
#[must_use]
pub fn is_valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Ordered, comparable version identifier such as `1.0`, `2.1.3` or `3.0-beta`.
///
/// Segments separated by `.` are compared one by one: a leading number
/// numerically, the remaining suffix lexicographically. A version with fewer
/// segments sorts before one that extends it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Parses a version id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidVersionId` for empty input, empty segments or
    /// characters outside `[0-9A-Za-z._-]`.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let valid_chars = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if value.is_empty() || !valid_chars || value.split('.').any(str::is_empty) {
            return Err(CoreError::InvalidVersionId {
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this version sorts before `other`.
    #[must_use]
    pub fn is_lower_than(&self, other: &VersionId) -> bool {
        self < other
    }

    /// Returns true if this version sorts after `other`.
    #[must_use]
    pub fn is_higher_than(&self, other: &VersionId) -> bool {
        self > other
    }

    fn segments(&self) -> impl Iterator<Item = (Option<u64>, &str)> {
        self.0.split('.').map(|segment| {
            let digits = segment
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(segment.len());
            let number = segment[..digits].parse::<u64>().ok();
            (number, &segment[digits..])
        })
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.segments();
        let mut right = other.segments();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return self.0.cmp(&other.0),
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some((ln, ls)), Some((rn, rs))) => {
                    let ord = ln.cmp(&rn).then_with(|| ls.cmp(rs));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.0
    }
}

/// A (store, version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionAddress {
    /// Store identifier.
    pub store_id: String,
    /// Version within the store.
    pub version: VersionId,
}

impl VersionAddress {
    /// Creates a version address.
    #[must_use]
    pub fn new(store_id: impl Into<String>, version: VersionId) -> Self {
        Self {
            store_id: store_id.into(),
            version,
        }
    }
}

impl fmt::Display for VersionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.store_id, self.version)
    }
}

/// The closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Ordered container of child nodes.
    Group,
    /// XML document content.
    XmlDoc,
    /// Image content.
    Image,
    /// Plain file content.
    File,
    /// Content node pointing at another node by alias.
    Reference,
}

impl NodeKind {
    /// Returns true for group nodes.
    #[must_use]
    pub const fn is_group(self) -> bool {
        matches!(self, Self::Group)
    }

    /// Returns true for every node that carries a content stream.
    #[must_use]
    pub const fn is_content(self) -> bool {
        !self.is_group()
    }

    /// Returns true for reference nodes.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Reference)
    }

    /// Returns the lowercase name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::XmlDoc => "xml",
            Self::Image => "image",
            Self::File => "file",
            Self::Reference => "reference",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Life-cycle state of a version for one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    /// Editable.
    Draft,
    /// Frozen; versions may derive from it.
    Released,
    /// Derived state of a translation whose base version is not released
    /// for that language. Never assigned directly.
    TranslationPending,
}

impl VersionState {
    /// Returns the persisted name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Released => "released",
            Self::TranslationPending => "translation_pending",
        }
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "released" => Ok(Self::Released),
            "translation_pending" => Ok(Self::TranslationPending),
            other => Err(CoreError::invalid_operation(format!(
                "unknown version state: {other}"
            ))),
        }
    }
}

/// One entry of a content node's write history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the content was written.
    pub timestamp: Timestamp,
    /// User that wrote the content.
    pub user: String,
    /// Language variant that was written; `None` for the original.
    pub lang: Option<String>,
    /// Length of the written content in bytes.
    pub length: u64,
}
