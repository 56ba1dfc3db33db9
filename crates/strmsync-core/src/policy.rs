//! Extension based file acceptance
//!
//! [`ExtensionPolicy`] is the default [`FileAcceptancePolicy`]: it classifies
//! files by extension, rejects small media, and excludes names matching a
//! configured list of glob patterns.

use glob::Pattern;
use tracing::warn;

use crate::config::SyncConfig;
use crate::domain::{FileClass, SyncFileEntry};
use crate::ports::FileAcceptancePolicy;

const MIB: u64 = 1024 * 1024;

/// Accepts media and metadata files, excluding configured names
#[derive(Debug, Clone)]
pub struct ExtensionPolicy {
    exclude_exact: Vec<String>,
    exclude_patterns: Vec<Pattern>,
    media_extensions: Vec<String>,
    metadata_extensions: Vec<String>,
    min_media_size: u64,
}

impl ExtensionPolicy {
    /// Builds a policy from the `sync` configuration section.
    ///
    /// Patterns that fail to compile are kept as exact names only.
    pub fn from_config(config: &SyncConfig) -> Self {
        let mut exclude_patterns = Vec::new();
        for name in &config.exclude_names {
            match Pattern::new(name) {
                Ok(p) => exclude_patterns.push(p),
                Err(err) => warn!(pattern = %name, error = %err, "Ignoring invalid exclude pattern"),
            }
        }

        Self {
            exclude_exact: config.exclude_names.clone(),
            exclude_patterns,
            media_extensions: normalize_extensions(&config.media_extensions),
            metadata_extensions: normalize_extensions(&config.metadata_extensions),
            min_media_size: config.min_file_size_mb.saturating_mul(MIB),
        }
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| {
            let e = e.trim().to_lowercase();
            if e.starts_with('.') {
                e
            } else {
                format!(".{e}")
            }
        })
        .collect()
}

impl FileAcceptancePolicy for ExtensionPolicy {
    fn valid(&self, entry: &SyncFileEntry) -> bool {
        if entry.is_dir() {
            return false;
        }
        let class = self.classify(entry);
        if class.is_media {
            return entry.size >= self.min_media_size;
        }
        class.is_metadata
    }

    fn is_excluded_name(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        self.exclude_exact.iter().any(|n| n == name)
            || self.exclude_patterns.iter().any(|p| p.matches(name))
    }

    fn classify(&self, entry: &SyncFileEntry) -> FileClass {
        let Some(ext) = entry.extension() else {
            return FileClass::default();
        };
        FileClass {
            is_media: self.media_extensions.contains(&ext),
            is_metadata: self.metadata_extensions.contains(&ext),
        }
    }
}
