//! Removable-asset suggestions: regex patterns over root-relative paths.
//!
//! Suggestions are advisory. Nothing here deletes anything; the host decides
//! whether to surface or act on them.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::core::errors::{DsgError, Result};
use crate::scanner::walker::UsageScanner;

/// How deep below the root candidates are looked for.
const MAX_SUGGEST_DEPTH: usize = 4;

/// One path that could be removed to free space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovableCandidate {
    pub path: PathBuf,
    /// The pattern that matched.
    pub pattern: String,
    pub size_bytes: u64,
}

/// Source of removal suggestions for a managed tree.
pub trait RemovableAssetSource: Send + Sync {
    fn suggest(&self, root: &Path, scanner: &dyn UsageScanner) -> Result<Vec<RemovableCandidate>>;
}

/// Check that a removable pattern compiles.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    compile(pattern).map(|_| ())
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| DsgError::InvalidPattern {
        pattern: pattern.to_string(),
        details: err.to_string(),
    })
}

/// Matches directory and file paths (relative to the root, `/`-separated)
/// against configured regexes.
#[derive(Debug, Clone)]
pub struct PatternRemovableSource {
    patterns: Vec<Regex>,
}

impl PatternRemovableSource {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    fn matching_pattern(&self, relative: &str) -> Option<&Regex> {
        self.patterns.iter().find(|re| re.is_match(relative))
    }

    fn collect(
        &self,
        root: &Path,
        dir: &Path,
        depth: usize,
        scanner: &dyn UsageScanner,
        out: &mut Vec<RemovableCandidate>,
    ) -> Result<()> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let Ok(ft) = entry.file_type() else {
                continue;
            };
            if ft.is_symlink() {
                continue;
            }
            let path = entry.path();
            let Some(relative) = relative_key(root, &path) else {
                continue;
            };

            if let Some(re) = self.matching_pattern(&relative) {
                let size_bytes = if ft.is_dir() {
                    scanner.scan(&path)?.size_bytes
                } else {
                    entry.metadata().map_or(0, |m| m.len())
                };
                out.push(RemovableCandidate {
                    path,
                    pattern: re.as_str().to_string(),
                    size_bytes,
                });
                continue;
            }

            if ft.is_dir() && depth < MAX_SUGGEST_DEPTH {
                self.collect(root, &path, depth + 1, scanner, out)?;
            }
        }
        Ok(())
    }
}

impl RemovableAssetSource for PatternRemovableSource {
    fn suggest(&self, root: &Path, scanner: &dyn UsageScanner) -> Result<Vec<RemovableCandidate>> {
        let mut out = Vec::new();
        if !self.patterns.is_empty() {
            self.collect(root, root, 1, scanner, &mut out)?;
        }
        out.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.path.cmp(&b.path)));
        Ok(out)
    }
}

/// Root-relative, `/`-joined path used for pattern matching.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
