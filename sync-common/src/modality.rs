//! Modality decision for a file, made once from its MIME type.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// How a file is turned into an embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Unsupported,
}

/// Application types that are plain text for embedding purposes.
const TEXTUAL_APPLICATION_TYPES: &[&str] = &[
    "json",
    "xml",
    "toml",
    "x-toml",
    "yaml",
    "x-yaml",
    "javascript",
    "x-sh",
    "x-python",
    "sql",
];

impl Modality {
    /// Classifies a path by the MIME type guessed from its extension.
    pub fn from_path(path: &Path) -> Self {
        let Some(mime) = mime_guess::from_path(path).first() else {
            return Modality::Unsupported;
        };

        match mime.type_().as_str() {
            "text" => Modality::Text,
            "image" => Modality::Image,
            "application" if TEXTUAL_APPLICATION_TYPES.contains(&mime.subtype().as_str()) => {
                Modality::Text
            }
            _ => Modality::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Unsupported => "unsupported",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Modality::Unsupported)
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
