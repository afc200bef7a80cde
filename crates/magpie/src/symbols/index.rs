//
// symbols/index.rs
//
// Global, eventually-consistent symbol index rebuilt from module analysis
//

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;

use crate::analyzer::ModuleAnalysis;
use crate::symbols::entry::SymbolEntry;

/// Namespace holding analyzer-internal metadata; never indexed.
pub const METADATA_NAMESPACE: &str = "__metadata__";

/// A global view of all available symbols across all namespaces.
///
/// Rebuilt wholesale from the current module analysis rather than patched
/// incrementally, which sidesteps detecting fine-grained deletions. The
/// backing map is concurrent: queries stay cheap, lock-free reads while a
/// rebuild writes.
///
/// Keys are fully-qualified names. Overloads can collide on a key; the last
/// write wins, which is acceptable because queries fan out by prefix rather
/// than exact lookup.
pub struct SymbolIndex {
    symbols: DashMap<String, SymbolEntry>,
    /// Namespaces whose declaration listing failed on a previous rebuild
    failed_namespaces: Mutex<HashSet<String>>,
    retry_failed_namespaces: bool,
}

impl Default for SymbolIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::with_retry_policy(true)
    }

    /// `retry_failed_namespaces` controls whether a namespace that failed to
    /// enumerate is attempted again on the next rebuild or stays skipped
    /// until [`reset`](Self::reset).
    pub fn with_retry_policy(retry_failed_namespaces: bool) -> Self {
        Self {
            symbols: DashMap::new(),
            failed_namespaces: Mutex::new(HashSet::new()),
            retry_failed_namespaces,
        }
    }

    /// Rebuild the index from the given module analysis.
    ///
    /// Walks every namespace reachable from the module root, skipping the
    /// internal metadata namespace. A namespace that fails to enumerate is
    /// logged and skipped; the rebuild commits whatever it collected, so a
    /// partially failed rebuild still leaves a valid, merely incomplete
    /// index. Safe to invoke repeatedly; a repeat with unchanged input is a
    /// no-op in effect.
    pub fn update(&self, module: &dyn ModuleAnalysis) {
        let started = Instant::now();
        log::info!("Updating symbol index...");

        let mut entries: Vec<SymbolEntry> = Vec::new();
        let mut newly_failed: Vec<String> = Vec::new();
        for namespace in all_namespaces(module) {
            if !self.retry_failed_namespaces
                && self.failed_namespaces.lock().unwrap().contains(&namespace)
            {
                log::trace!("Skipping previously failed namespace: {}", namespace);
                continue;
            }
            match module.declarations(&namespace) {
                Ok(declarations) => {
                    self.failed_namespaces.lock().unwrap().remove(&namespace);
                    entries.extend(declarations.iter().map(SymbolEntry::from_declaration));
                }
                Err(err) => {
                    log::warn!(
                        "Could not list declarations in namespace {}: {}",
                        namespace,
                        err
                    );
                    newly_failed.push(namespace);
                }
            }
        }
        {
            let mut failed = self.failed_namespaces.lock().unwrap();
            failed.extend(newly_failed);
        }

        // Commit wholesale: drop keys that vanished, then write the fresh
        // entries. Readers see the old or new record for a key, never a
        // partially built one.
        let keep: HashSet<String> = entries.iter().map(|e| e.fq_name.clone()).collect();
        self.symbols.retain(|key, _| keep.contains(key));
        let count = entries.len();
        for entry in entries {
            self.symbols.insert(entry.fq_name.clone(), entry);
        }

        log::info!(
            "Updated symbol index in {:?} ({} symbol(s))",
            started.elapsed(),
            count
        );
    }

    /// Symbols whose short name starts with `name`, suitable for
    /// import-suggestion queries. Results are sorted by fully-qualified
    /// name for determinism.
    pub fn query(&self, name: &str) -> Vec<SymbolEntry> {
        self.query_internal(name, true)
    }

    /// Symbols whose short name equals `name` exactly, with no fuzzy
    /// trailing match.
    pub fn query_exact(&self, name: &str) -> Vec<SymbolEntry> {
        self.query_internal(name, false)
    }

    fn query_internal(&self, name: &str, trailing_wildcard: bool) -> Vec<SymbolEntry> {
        let mut results: Vec<SymbolEntry> = self
            .symbols
            .iter()
            .filter(|entry| {
                let short = entry.value().short_name();
                if trailing_wildcard {
                    short.starts_with(name)
                } else {
                    short == name
                }
            })
            .map(|entry| entry.value().clone())
            .collect();
        results.sort_by(|a, b| a.fq_name.cmp(&b.fq_name));
        results
    }

    /// Drop all entries and forget failed namespaces.
    pub fn reset(&self) {
        self.symbols.clear();
        self.failed_namespaces.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Every namespace reachable from the module root, breadth first, skipping
/// the internal metadata namespace. The root itself contributes namespaces
/// but no declarations of its own.
fn all_namespaces(module: &dyn ModuleAnalysis) -> Vec<String> {
    let mut namespaces = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([String::new()]);
    while let Some(parent) = queue.pop_front() {
        for child in module.child_namespaces(&parent) {
            if child == METADATA_NAMESPACE {
                continue;
            }
            if seen.insert(child.clone()) {
                namespaces.push(child.clone());
                queue.push_back(child);
            }
        }
    }
    namespaces
}
