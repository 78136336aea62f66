//! Which paths under the watched root take part in indexing.

use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use sync_common::ConfigError;

/// Hidden-file and glob exclusion rules.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: String,
    excludes: GlobSet,
}

impl PathFilter {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            if pat.trim().is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(pat)
                .literal_separator(true)
                .build()
                .map_err(|e| ConfigError::Invalid {
                key: "SYNC_EXCLUDE",
                reason: format!("bad glob '{pat}': {e}"),
            })?;
            builder.add(glob);
        }
        let excludes = builder.build().map_err(|e| ConfigError::Invalid {
            key: "SYNC_EXCLUDE",
            reason: e.to_string(),
        })?;

        Ok(Self {
            root: root.to_string_lossy().trim_end_matches('/').to_string(),
            excludes,
        })
    }

    /// `path` is a normalized absolute path. Globs match the part below the root.
    pub fn accepts(&self, path: &str) -> bool {
        let Some(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        if !rel.is_empty() && !rel.starts_with('/') {
            return false;
        }
        let rel = rel.trim_start_matches('/');
        if rel.is_empty() {
            return true;
        }

        let hidden = rel.split('/').any(|seg| seg.starts_with('.'));
        !hidden && !self.excludes.is_match(rel)
    }
}
