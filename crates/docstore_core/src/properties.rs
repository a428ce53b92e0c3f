//! Reserved property keys and image rendition definitions.
//!
//! Store and version properties share one flat namespace with internal
//! bookkeeping entries. Keys under `docstore.*` and `docversion.*` listed
//! here are never returned by user-visible property listings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Sorted, comma separated list of registered rendition names.
pub const PROP_RENDITION_NAMES: &str = "docstore.imagerendition.names";
/// Prefix of a rendition's format key.
pub const PROP_RENDITION_FORMAT: &str = "docstore.imagerendition.format.";
/// Prefix of a rendition's maximum width key.
pub const PROP_RENDITION_MAX_WIDTH: &str = "docstore.imagerendition.max_width.";
/// Prefix of a rendition's maximum height key.
pub const PROP_RENDITION_MAX_HEIGHT: &str = "docstore.imagerendition.max_height.";
/// Store UUID.
pub const PROP_STORE_UUID: &str = "docstore.uuid";
/// Version UUID.
pub const PROP_VERSION_UUID: &str = "docversion.uuid";
/// Original-language version state.
pub const PROP_VERSION_STATE: &str = "docversion.state";
/// Version creation date in epoch millis.
pub const PROP_VERSION_CREATION_DATE: &str = "docversion.creationdate";
/// Original-language release date in epoch millis.
pub const PROP_VERSION_RELEASE_DATE: &str = "docversion.releasedate";

/// Reserved store keys; entries ending with `.` are prefixes.
const INTERNAL_STORE_PROPS: &[&str] = &["docstore.imagerendition.", PROP_STORE_UUID];

/// Reserved version keys; entries ending with `.` are prefixes.
const INTERNAL_VERSION_PROPS: &[&str] = &[
    PROP_VERSION_UUID,
    PROP_VERSION_STATE,
    "docversion.state.",
    PROP_VERSION_CREATION_DATE,
    PROP_VERSION_RELEASE_DATE,
    "docversion.releasedate.",
];

fn matches_reserved(name: &str, reserved: &[&str]) -> bool {
    reserved.iter().any(|key| {
        if key.ends_with('.') {
            name.starts_with(key)
        } else {
            name == *key
        }
    })
}

/// Returns true if the store property is internal bookkeeping.
#[must_use]
pub fn is_internal_store_property(name: &str) -> bool {
    matches_reserved(name, INTERNAL_STORE_PROPS)
}

/// Returns true if the version property is internal bookkeeping.
#[must_use]
pub fn is_internal_version_property(name: &str) -> bool {
    matches_reserved(name, INTERNAL_VERSION_PROPS)
}

/// Version state key for a language; `None` is the original language.
#[must_use]
pub fn version_state_key(lang: Option<&str>) -> String {
    match lang {
        Some(lang) => format!("{PROP_VERSION_STATE}.{}", lang.to_ascii_lowercase()),
        None => PROP_VERSION_STATE.to_string(),
    }
}

/// Release date key for a language; `None` is the original language.
#[must_use]
pub fn release_date_key(lang: Option<&str>) -> String {
    match lang {
        Some(lang) => format!("{PROP_VERSION_RELEASE_DATE}.{}", lang.to_ascii_lowercase()),
        None => PROP_VERSION_RELEASE_DATE.to_string(),
    }
}

/// Target format of an image rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG.
    Jpeg,
    /// GIF.
    Gif,
    /// BMP.
    Bmp,
    /// PNG.
    Png,
    /// TIFF.
    Tiff,
}

impl ImageFormat {
    /// Returns the persisted format name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Png => "png",
            Self::Tiff => "tiff",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "gif" => Ok(Self::Gif),
            "bmp" => Ok(Self::Bmp),
            "png" => Ok(Self::Png),
            "tiff" | "tif" => Ok(Self::Tiff),
            other => Err(CoreError::rendition(format!(
                "unsupported image format: {other}"
            ))),
        }
    }
}

/// A named, size-constrained image variant registered on a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRendition {
    name: String,
    format: ImageFormat,
    max_width: u32,
    max_height: u32,
}

impl ImageRendition {
    /// Creates a rendition definition.
    ///
    /// # Errors
    ///
    /// Returns a rendition error if the name does not match
    /// `[A-Za-z][0-9A-Za-z_-]+`.
    pub fn new(
        name: impl Into<String>,
        format: ImageFormat,
        max_width: u32,
        max_height: u32,
    ) -> CoreResult<Self> {
        let name = name.into();
        if !is_valid_rendition_name(&name) {
            return Err(CoreError::rendition(format!(
                "invalid rendition name: {name:?}"
            )));
        }
        Ok(Self {
            name,
            format,
            max_width,
            max_height,
        })
    }

    /// Rendition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target image format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Maximum width in pixels.
    #[must_use]
    pub const fn max_width(&self) -> u32 {
        self.max_width
    }

    /// Maximum height in pixels.
    #[must_use]
    pub const fn max_height(&self) -> u32 {
        self.max_height
    }

    pub(crate) fn format_key(name: &str) -> String {
        format!("{PROP_RENDITION_FORMAT}{name}")
    }

    pub(crate) fn max_width_key(name: &str) -> String {
        format!("{PROP_RENDITION_MAX_WIDTH}{name}")
    }

    pub(crate) fn max_height_key(name: &str) -> String {
        format!("{PROP_RENDITION_MAX_HEIGHT}{name}")
    }
}

fn is_valid_rendition_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    let rest = chars.as_str();
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parses the comma list stored under [`PROP_RENDITION_NAMES`].
#[must_use]
pub fn parse_name_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_store_properties() {
        assert!(is_internal_store_property("docstore.uuid"));
        assert!(is_internal_store_property("docstore.imagerendition.names"));
        assert!(is_internal_store_property("docstore.imagerendition.format.thumb"));
        assert!(!is_internal_store_property("docstore.title"));
        assert!(!is_internal_store_property("docstore.uuid2"));
    }

    #[test]
    fn internal_version_properties() {
        assert!(is_internal_version_property("docversion.state"));
        assert!(is_internal_version_property("docversion.state.de"));
        assert!(is_internal_version_property("docversion.releasedate.fr"));
        assert!(is_internal_version_property("docversion.creationdate"));
        assert!(!is_internal_version_property("docversion.comment"));
        assert!(!is_internal_version_property("author"));
    }

    #[test]
    fn language_keys() {
        assert_eq!(version_state_key(None), "docversion.state");
        assert_eq!(version_state_key(Some("de")), "docversion.state.de");
        assert_eq!(release_date_key(Some("de")), "docversion.releasedate.de");
    }

    #[test]
    fn rendition_name_validation() {
        assert!(ImageRendition::new("thumb", ImageFormat::Png, 100, 100).is_ok());
        assert!(ImageRendition::new("web-large_2", ImageFormat::Jpeg, 800, 600).is_ok());
        assert!(ImageRendition::new("t", ImageFormat::Png, 1, 1).is_err());
        assert!(ImageRendition::new("2x", ImageFormat::Png, 1, 1).is_err());
        assert!(ImageRendition::new("has space", ImageFormat::Png, 1, 1).is_err());
    }

    #[test]
    fn name_list_parsing() {
        assert_eq!(parse_name_list(Some("a1, b2,,c3")), vec!["a1", "b2", "c3"]);
        assert!(parse_name_list(None).is_empty());
    }
}
