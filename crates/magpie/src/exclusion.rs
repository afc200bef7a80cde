//
// exclusion.rs
//
// Workspace-membership filtering: static denylist, ignore-rule files,
// and script-handling toggles
//

use std::path::{Component, Path, PathBuf};

use ignore::gitignore::Gitignore;
use url::Url;
use walkdir::WalkDir;

use crate::config::EngineConfig;

/// Directory names that never participate in analysis, at any depth below a
/// workspace root. Covers version control, IDE state, build output, and
/// dependency caches.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vs",
    ".vscode",
    ".settings",
    "bin",
    "build",
    "out",
    "target",
    "node_modules",
];

/// Immutable membership filter for a set of workspace roots.
///
/// Built once from the current roots and configuration, then queried as a
/// pure function. When rule files or roots change, callers build a fresh
/// filter and swap it in; a filter value itself never mutates.
pub struct SourceFilter {
    roots: Vec<PathBuf>,
    excluded_dirs: Vec<String>,
    /// Ignore matchers keyed by the directory holding the rule file,
    /// deepest directory first so the nearest enclosing file wins.
    ignore_matchers: Vec<(PathBuf, Gitignore)>,
    scripts_enabled: bool,
    build_scripts_enabled: bool,
    script_extensions: Vec<String>,
    build_script_suffixes: Vec<String>,
}

impl std::fmt::Debug for SourceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFilter")
            .field("roots", &self.roots)
            .field("ignore_files", &self.ignore_matchers.len())
            .finish_non_exhaustive()
    }
}

impl SourceFilter {
    /// Build a filter for the given roots, collecting ignore-rule files by
    /// walking each root downward. Unreadable rule files degrade to "no
    /// additional patterns" rather than failing the build.
    pub fn build(roots: &[PathBuf], config: &EngineConfig) -> Self {
        let mut excluded_dirs: Vec<String> =
            DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect();
        for extra in &config.exclusions.extra_excluded_dirs {
            if !excluded_dirs.contains(extra) {
                excluded_dirs.push(extra.clone());
            }
        }

        let mut ignore_matchers = Vec::new();
        for root in roots {
            let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && excluded_dirs.iter().any(|d| *d == name))
            });
            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.file_name().to_string_lossy() != config.exclusions.ignore_file_name {
                    continue;
                }
                let (matcher, err) = Gitignore::new(entry.path());
                if let Some(err) = err {
                    log::warn!(
                        "Could not fully read ignore file {}: {}",
                        entry.path().display(),
                        err
                    );
                }
                let dir = entry
                    .path()
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                log::debug!(
                    "Read {} ignore pattern(s) from {}",
                    matcher.num_ignores(),
                    entry.path().display()
                );
                ignore_matchers.push((dir, matcher));
            }
        }
        // Deepest rule file first; for a given path the nearest enclosing
        // file is consulted before any file above it.
        ignore_matchers.sort_by_key(|(dir, _)| std::cmp::Reverse(dir.components().count()));

        Self {
            roots: roots.to_vec(),
            excluded_dirs,
            ignore_matchers,
            scripts_enabled: config.scripts.enabled,
            build_scripts_enabled: config.scripts.build_scripts_enabled,
            script_extensions: config.scripts.extensions.clone(),
            build_script_suffixes: config.scripts.build_script_suffixes.clone(),
        }
    }

    /// Whether a filesystem path participates in analysis.
    pub fn is_included(&self, path: &Path) -> bool {
        if !self.roots.iter().any(|root| path.starts_with(root)) {
            return false;
        }

        // Denylisted directory name anywhere below any containing root.
        for root in &self.roots {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            for component in relative.components() {
                if let Component::Normal(segment) = component {
                    let segment = segment.to_string_lossy();
                    if self.excluded_dirs.iter().any(|d| *d == segment) {
                        return false;
                    }
                }
            }
        }

        if self.is_build_script(path) {
            if !(self.scripts_enabled && self.build_scripts_enabled) {
                return false;
            }
        } else if self.is_script(path) && !self.scripts_enabled {
            return false;
        }

        // Nearest enclosing ignore file wins.
        let is_dir = path.is_dir();
        for (dir, matcher) in &self.ignore_matchers {
            if !path.starts_with(dir) {
                continue;
            }
            match matcher.matched_path_or_any_parents(path, is_dir) {
                ignore::Match::Ignore(_) => return false,
                ignore::Match::Whitelist(_) => return true,
                ignore::Match::None => {}
            }
        }

        true
    }

    /// URI form of [`is_included`](Self::is_included). URIs that do not
    /// resolve to a filesystem path are included (fail open).
    pub fn is_included_uri(&self, uri: &Url) -> bool {
        match uri.to_file_path() {
            Ok(path) => self.is_included(&path),
            Err(()) => true,
        }
    }

    /// All files under the workspace roots that survive the filter.
    /// Excluded directories are pruned during the walk, not merely skipped.
    pub fn walk_included(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in &self.roots {
            let walker = WalkDir::new(root)
                .into_iter()
                .filter_entry(|entry| entry.path() == root || self.is_included(entry.path()));
            for entry in walker.flatten() {
                if entry.file_type().is_file() && self.is_included(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        }
        files
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn is_script(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.script_extensions.iter().any(|s| s == ext))
            .unwrap_or(false)
    }

    fn is_build_script(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| {
                self.build_script_suffixes
                    .iter()
                    .any(|suffix| name.ends_with(suffix.as_str()))
            })
            .unwrap_or(false)
    }
}
