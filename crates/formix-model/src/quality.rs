//! Quality identifiers, namespaced by the profile category they come from.
//!
//! Ingredient properties arrive in separate category lists (`profile`,
//! `sustainability`, ...). A quality is addressed everywhere else by the pair
//! (category, name), rendered canonically as `profile__sugars`: the same
//! flattened key the wire format uses for process-loss rows.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    Profile,
    Sustainability,
    OtherParams,
    AminoAcidProfile,
    Subcomponents,
}

impl QualityCategory {
    /// The wire key for this category, as used in request payloads and in
    /// the flattened `<category>__<name>` rendering.
    pub fn key(self) -> &'static str {
        match self {
            QualityCategory::Profile => "profile",
            QualityCategory::Sustainability => "sustainability",
            QualityCategory::OtherParams => "otherp",
            QualityCategory::AminoAcidProfile => "AAprofile",
            QualityCategory::Subcomponents => "subcomponents",
        }
    }

    pub fn all() -> [QualityCategory; 5] {
        [
            QualityCategory::Profile,
            QualityCategory::Sustainability,
            QualityCategory::OtherParams,
            QualityCategory::AminoAcidProfile,
            QualityCategory::Subcomponents,
        ]
    }

    pub fn from_key(key: &str) -> Option<Self> {
        QualityCategory::all().into_iter().find(|c| c.key() == key)
    }
}

/// A named scalar property of a good, namespaced by category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualityId {
    pub category: QualityCategory,
    pub name: String,
}

impl QualityId {
    pub fn new(category: QualityCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }

    pub fn profile(name: impl Into<String>) -> Self {
        Self::new(QualityCategory::Profile, name)
    }

    /// Parse the flattened `<category>__<name>` rendering.
    pub fn parse(flat: &str) -> Option<Self> {
        let (key, name) = flat.split_once("__")?;
        let category = QualityCategory::from_key(key)?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(category, name))
    }
}

impl fmt::Display for QualityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.category.key(), self.name)
    }
}
