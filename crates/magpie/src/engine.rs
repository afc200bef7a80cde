//
// engine.rs
//
// The workspace analysis engine: routes file events through the membership
// filter and debouncer onto single-owner executors, and keeps the compiled
// unit cache and symbol index current
//

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::analyzer::Analyzer;
use crate::config::EngineConfig;
use crate::debouncer::Debouncer;
use crate::environment::{CachedEnvironmentResolver, EnvironmentResolver};
use crate::exclusion::SourceFilter;
use crate::executor::{TaskExecutor, TaskHandle};
use crate::symbols::{SymbolEntry, SymbolIndex};
use crate::unit_cache::CompiledUnitCache;

type SharedEnvironment = Arc<CachedEnvironmentResolver<Box<dyn EnvironmentResolver>>>;

/// The engine owns one executor per mutable subsystem so that slow work in
/// one cannot starve another, and one debouncer for edit-triggered
/// re-analysis. Query methods read the last committed snapshots and never
/// block on the queues.
pub struct WorkspaceEngine<A: Analyzer> {
    analyzer: Arc<A>,
    config: RwLock<EngineConfig>,
    roots: RwLock<Vec<PathBuf>>,
    filter: RwLock<Arc<SourceFilter>>,
    units: Arc<CompiledUnitCache<A::Unit>>,
    symbols: Arc<SymbolIndex>,
    dirty: Arc<Mutex<HashSet<PathBuf>>>,
    analysis: Arc<TaskExecutor>,
    indexing: Arc<TaskExecutor>,
    resolution: Arc<TaskExecutor>,
    analyze_debouncer: Debouncer,
    environment: Option<SharedEnvironment>,
}

impl<A: Analyzer> WorkspaceEngine<A> {
    pub fn new(analyzer: A, config: EngineConfig) -> Self {
        config.log_at_startup();
        let window = Duration::from_millis(config.analysis_debounce_ms);
        let filter = Arc::new(SourceFilter::build(&[], &config));
        let symbols = Arc::new(SymbolIndex::with_retry_policy(
            config.indexing.retry_failed_namespaces,
        ));
        Self {
            analyzer: Arc::new(analyzer),
            config: RwLock::new(config),
            roots: RwLock::new(Vec::new()),
            filter: RwLock::new(filter),
            units: Arc::new(CompiledUnitCache::new()),
            symbols,
            dirty: Arc::new(Mutex::new(HashSet::new())),
            analysis: Arc::new(TaskExecutor::new("analysis")),
            indexing: Arc::new(TaskExecutor::new("indexing")),
            resolution: Arc::new(TaskExecutor::new("resolution")),
            analyze_debouncer: Debouncer::new(window),
            environment: None,
        }
    }

    /// Attach a build-environment resolver, cached through the given store.
    pub fn with_environment_resolver(
        mut self,
        resolver: Box<dyn EnvironmentResolver>,
        store: Option<crate::store::ObjectStore>,
    ) -> Self {
        self.environment = Some(Arc::new(CachedEnvironmentResolver::new(resolver, store)));
        self
    }

    // ------------------------------------------------------------------
    // Workspace lifecycle
    // ------------------------------------------------------------------

    pub fn add_root(&self, root: PathBuf) {
        {
            let mut roots = self.roots.write().unwrap();
            if roots.contains(&root) {
                return;
            }
            log::info!("Adding workspace root: {}", root.display());
            roots.push(root);
        }
        self.rebuild_filter();
        self.scan_workspace();
    }

    pub fn remove_root(&self, root: &Path) {
        {
            let mut roots = self.roots.write().unwrap();
            roots.retain(|r| r != root);
        }
        log::info!("Removing workspace root: {}", root.display());
        self.rebuild_filter();

        for path in self.units.paths() {
            if path.starts_with(root) {
                self.units.remove(&path);
            }
        }
        self.schedule_index_rebuild();
    }

    /// Re-read membership rules after an ignore-rule file changed. The new
    /// filter is swapped in atomically and files that fell out of the
    /// workspace are dropped from analysis.
    pub fn reload_rules(&self) {
        self.rebuild_filter();
        let filter = self.current_filter();
        let mut dropped = 0usize;
        for path in self.units.paths() {
            if !filter.is_included(&path) {
                self.units.remove(&path);
                self.dirty.lock().unwrap().remove(&path);
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::info!("Membership rules dropped {} file(s) from analysis", dropped);
            self.schedule_index_rebuild();
        }
    }

    pub fn update_config(&self, config: EngineConfig) {
        *self.config.write().unwrap() = config;
        self.reload_rules();
    }

    // ------------------------------------------------------------------
    // File events
    // ------------------------------------------------------------------

    pub fn did_open(&self, path: PathBuf, version: i64, content: String) {
        if !self.current_filter().is_included(&path) {
            log::trace!("Ignoring open of excluded file: {}", path.display());
            return;
        }
        self.units.open(path.clone(), content, version);
        self.mark_dirty(path);
        self.schedule_pending_analysis();
    }

    pub fn did_change(&self, path: PathBuf, version: i64, content: String) {
        if !self.current_filter().is_included(&path) {
            return;
        }
        if !self.units.update(&path, content.clone(), version) {
            self.units.open(path.clone(), content, version);
        }
        self.mark_dirty(path);
        self.schedule_pending_analysis();
    }

    /// An explicit save flushes pending analysis without waiting out the
    /// quiescence window.
    pub fn did_save(&self, path: PathBuf) {
        if !self.current_filter().is_included(&path) {
            return;
        }
        self.mark_dirty(path);
        let job = self.pending_analysis_job();
        self.analyze_debouncer.submit_immediately(job);
    }

    /// On close the disk contents become authoritative again. A file that
    /// no longer exists on disk leaves the workspace.
    pub fn did_close(&self, path: PathBuf) {
        match std::fs::read_to_string(&path) {
            Ok(disk_content) => {
                if let Some((_, version)) = self.units.current(&path) {
                    self.units.update(&path, disk_content, version + 1);
                    self.mark_dirty(path);
                    self.schedule_pending_analysis();
                }
            }
            Err(_) => {
                self.units.remove(&path);
                self.dirty.lock().unwrap().remove(&path);
                self.schedule_index_rebuild();
            }
        }
    }

    pub fn did_delete(&self, path: PathBuf) {
        self.units.remove(&path);
        self.dirty.lock().unwrap().remove(&path);
        self.schedule_index_rebuild();
    }

    // ------------------------------------------------------------------
    // Queries (read the last committed snapshot, never block on queues)
    // ------------------------------------------------------------------

    pub fn analysis(&self, path: &Path) -> Option<Arc<A::Unit>> {
        self.units.get(path)
    }

    pub fn is_analysis_fresh(&self, path: &Path) -> bool {
        self.units.is_fresh(path)
    }

    pub fn query_symbols(&self, name: &str) -> Vec<SymbolEntry> {
        self.symbols.query(name)
    }

    pub fn query_symbols_exact(&self, name: &str) -> Vec<SymbolEntry> {
        self.symbols.query_exact(name)
    }

    pub fn is_included(&self, path: &Path) -> bool {
        self.current_filter().is_included(path)
    }

    pub fn is_included_uri(&self, uri: &Url) -> bool {
        self.current_filter().is_included_uri(uri)
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.units.paths()
    }

    // ------------------------------------------------------------------
    // Build environment
    // ------------------------------------------------------------------

    /// Resolve the build environment on the resolution executor. Returns
    /// `None` when no resolver is attached; otherwise the handle reports
    /// whether resolution succeeded.
    pub fn refresh_environment(&self) -> Option<TaskHandle<bool>> {
        let environment = Arc::clone(self.environment.as_ref()?);
        Some(self.resolution.compute(move || match environment.resolve() {
            Ok(resolved) => {
                log::info!(
                    "Resolved build environment with {} entries",
                    resolved.entries.len()
                );
                true
            }
            Err(err) => {
                log::warn!("Build environment resolution failed: {}", err);
                false
            }
        }))
    }

    /// Sticky failure flag of the last resolution attempt; cleared by the
    /// next success.
    pub fn environment_resolution_failed(&self) -> bool {
        self.environment
            .as_ref()
            .map(|e| e.last_resolution_failed())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Shutdown and test support
    // ------------------------------------------------------------------

    /// Wait until the debouncer and every owned executor have drained.
    pub async fn quiesce(&self) {
        self.analyze_debouncer.wait_for_pending_task().await;
        let _ = self.analysis.compute(|| ()).join().await;
        let _ = self.indexing.compute(|| ()).join().await;
        let _ = self.resolution.compute(|| ()).join().await;
    }

    pub async fn shutdown(&self) {
        log::info!("Shutting down workspace engine");
        self.analyze_debouncer.shutdown(true).await;
        self.analysis.shutdown(true);
        self.indexing.shutdown(true);
        self.resolution.shutdown(true);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn current_filter(&self) -> Arc<SourceFilter> {
        Arc::clone(&self.filter.read().unwrap())
    }

    fn rebuild_filter(&self) {
        let roots = self.roots.read().unwrap().clone();
        let config = self.config.read().unwrap().clone();
        *self.filter.write().unwrap() = Arc::new(SourceFilter::build(&roots, &config));
    }

    fn mark_dirty(&self, path: PathBuf) {
        self.dirty.lock().unwrap().insert(path);
    }

    fn schedule_pending_analysis(&self) {
        let job = self.pending_analysis_job();
        self.analyze_debouncer.schedule(job);
    }

    /// The debounced body: push the dirty set through the analysis
    /// executor, then trigger an index rebuild. The debounce token is
    /// threaded into the executor task so a superseded burst stops between
    /// files and hands its remaining work to the superseding task.
    fn pending_analysis_job(&self) -> impl FnOnce(&CancellationToken) + Send + 'static {
        let analyzer = Arc::clone(&self.analyzer);
        let units = Arc::clone(&self.units);
        let symbols = Arc::clone(&self.symbols);
        let dirty = Arc::clone(&self.dirty);
        let analysis = Arc::clone(&self.analysis);
        let indexing = Arc::clone(&self.indexing);
        let filter = self.current_filter();
        let indexing_enabled = self.config.read().unwrap().indexing.enabled;

        move |debounce_token: &CancellationToken| {
            let debounce_token = debounce_token.clone();
            analysis.execute_with(move |executor_token| {
                let mut pending: Vec<PathBuf> = {
                    let mut dirty = dirty.lock().unwrap();
                    dirty.drain().collect()
                };
                pending.sort();

                let mut remaining = pending.into_iter();
                while let Some(path) = remaining.next() {
                    if debounce_token.is_cancelled() || executor_token.is_cancelled() {
                        // Superseded: hand the rest back to the dirty set
                        // for the next run.
                        let mut dirty = dirty.lock().unwrap();
                        dirty.insert(path);
                        dirty.extend(remaining);
                        return;
                    }
                    if !filter.is_included(&path) {
                        continue;
                    }
                    let Some((content, version)) = units.current(&path) else {
                        continue;
                    };
                    match analyzer.analyze_file(&path, &content) {
                        Ok(unit) => units.commit(&path, content, version, unit),
                        Err(err) => {
                            // Keep serving the previous result for this file.
                            log::warn!("Analysis failed for {}: {}", path.display(), err);
                        }
                    }
                }

                schedule_index_rebuild(&indexing, &analyzer, &units, &symbols, indexing_enabled);
            });
        }
    }

    /// Initial (or post-root-change) scan: analyze everything the filter
    /// admits, then rebuild the index.
    fn scan_workspace(&self) {
        let analyzer = Arc::clone(&self.analyzer);
        let units = Arc::clone(&self.units);
        let symbols = Arc::clone(&self.symbols);
        let indexing = Arc::clone(&self.indexing);
        let filter = self.current_filter();
        let indexing_enabled = self.config.read().unwrap().indexing.enabled;

        self.analysis.execute_with(move |token| {
            let files = filter.walk_included();
            log::info!("Scanning {} workspace file(s)", files.len());
            for path in files {
                if token.is_cancelled() {
                    return;
                }
                if units.contains(&path) {
                    // Tracked content is authoritative over the disk copy.
                    continue;
                }
                let content = match std::fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(err) => {
                        log::trace!("Skipping unreadable file {}: {}", path.display(), err);
                        continue;
                    }
                };
                units.open(path.clone(), content.clone(), 0);
                match analyzer.analyze_file(&path, &content) {
                    Ok(unit) => units.commit(&path, content, 0, unit),
                    Err(err) => log::warn!("Analysis failed for {}: {}", path.display(), err),
                }
            }
            schedule_index_rebuild(&indexing, &analyzer, &units, &symbols, indexing_enabled);
        });
    }

    fn schedule_index_rebuild(&self) {
        let indexing_enabled = self.config.read().unwrap().indexing.enabled;
        schedule_index_rebuild(
            &self.indexing,
            &self.analyzer,
            &self.units,
            &self.symbols,
            indexing_enabled,
        );
    }
}

/// Submit a full symbol-index rebuild to the indexing executor. A failed
/// module analysis keeps the previous index.
fn schedule_index_rebuild<A: Analyzer>(
    indexing: &TaskExecutor,
    analyzer: &Arc<A>,
    units: &Arc<CompiledUnitCache<A::Unit>>,
    symbols: &Arc<SymbolIndex>,
    enabled: bool,
) {
    if !enabled {
        return;
    }
    let analyzer = Arc::clone(analyzer);
    let units = Arc::clone(units);
    let symbols = Arc::clone(symbols);
    indexing.execute(move || {
        let mut files = units.paths();
        files.sort();
        match analyzer.analyze_module(&files) {
            Ok(module) => symbols.update(module.as_ref()),
            Err(err) => {
                log::warn!("Module analysis failed, keeping previous symbol index: {}", err);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Declaration, DeclarationNode, ModuleAnalysis, RawVisibility};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Analyzer that derives one public function per file stem.
    struct StemAnalyzer {
        file_calls: AtomicUsize,
    }

    struct StemModule {
        names: Vec<String>,
    }

    impl ModuleAnalysis for StemModule {
        fn child_namespaces(&self, parent: &str) -> Vec<String> {
            if parent.is_empty() {
                vec!["app".to_string()]
            } else {
                Vec::new()
            }
        }

        fn declarations(&self, namespace: &str) -> anyhow::Result<Vec<Declaration>> {
            if namespace != "app" {
                return Ok(Vec::new());
            }
            Ok(self
                .names
                .iter()
                .map(|name| {
                    Declaration::new(
                        format!("app.{name}"),
                        RawVisibility::Public,
                        DeclarationNode::Function { receiver: None },
                    )
                })
                .collect())
        }
    }

    impl Analyzer for StemAnalyzer {
        type Unit = String;

        fn analyze_file(&self, _path: &Path, content: &str) -> anyhow::Result<String> {
            self.file_calls.fetch_add(1, Ordering::SeqCst);
            if content.contains("#error") {
                anyhow::bail!("syntax error");
            }
            Ok(content.to_uppercase())
        }

        fn analyze_module(&self, files: &[PathBuf]) -> anyhow::Result<Box<dyn ModuleAnalysis>> {
            let names = files
                .iter()
                .filter_map(|f| f.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .collect();
            Ok(Box::new(StemModule { names }))
        }
    }

    fn engine() -> WorkspaceEngine<StemAnalyzer> {
        WorkspaceEngine::new(
            StemAnalyzer {
                file_calls: AtomicUsize::new(0),
            },
            EngineConfig::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_analyzes_and_indexes() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        engine.add_root(dir.path().to_path_buf());

        let path = dir.path().join("main.c");
        engine.did_open(path.clone(), 1, "fn main".to_string());
        engine.quiesce().await;

        assert_eq!(engine.analysis(&path).as_deref(), Some(&"FN MAIN".to_string()));
        assert!(engine.is_analysis_fresh(&path));
        assert_eq!(engine.query_symbols("main").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_excluded_file_is_dropped_at_intake() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        engine.add_root(dir.path().to_path_buf());

        let path = dir.path().join("build/gen.c");
        engine.did_open(path.clone(), 1, "generated".to_string());
        engine.quiesce().await;

        assert!(engine.analysis(&path).is_none());
        assert!(engine.query_symbols("gen").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_analysis_retains_previous_result() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        engine.add_root(dir.path().to_path_buf());

        let path = dir.path().join("main.c");
        engine.did_open(path.clone(), 1, "good".to_string());
        engine.quiesce().await;
        assert_eq!(engine.analysis(&path).as_deref(), Some(&"GOOD".to_string()));

        engine.did_change(path.clone(), 2, "#error broken".to_string());
        engine.quiesce().await;

        assert_eq!(
            engine.analysis(&path).as_deref(),
            Some(&"GOOD".to_string()),
            "stale result keeps serving after a failed re-analysis"
        );
        assert!(!engine.is_analysis_fresh(&path));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rapid_changes_coalesce_into_one_analysis() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        engine.add_root(dir.path().to_path_buf());

        let path = dir.path().join("main.c");
        engine.did_open(path.clone(), 1, "v1".to_string());
        engine.quiesce().await;
        let before = engine.analyzer.file_calls.load(Ordering::SeqCst);

        for version in 2..=5 {
            engine.did_change(path.clone(), version, format!("v{version}"));
        }
        engine.quiesce().await;

        let after = engine.analyzer.file_calls.load(Ordering::SeqCst);
        assert_eq!(after - before, 1, "a burst of edits triggers one re-analysis");
        assert_eq!(engine.analysis(&path).as_deref(), Some(&"V5".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_drops_unit_and_symbols() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        engine.add_root(dir.path().to_path_buf());

        let path = dir.path().join("gone.c");
        engine.did_open(path.clone(), 1, "x".to_string());
        engine.quiesce().await;
        assert_eq!(engine.query_symbols("gone").len(), 1);

        engine.did_delete(path.clone());
        engine.quiesce().await;

        assert!(engine.analysis(&path).is_none());
        assert!(engine.query_symbols("gone").is_empty());
    }
}
