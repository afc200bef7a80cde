//
// config.rs
//
// Configuration for the workspace analysis engine
//

/// Script-file handling.
///
/// Script files are only analyzed when `enabled` is set; build-tool scripts
/// additionally require `build_scripts_enabled`. Which files count as
/// scripts is host-defined via the extension and suffix lists, since the
/// engine itself is language-agnostic.
#[derive(Debug, Clone, Default)]
pub struct ScriptsConfig {
    /// Whether script files participate in analysis at all
    pub enabled: bool,
    /// Whether build-tool script files participate in analysis
    pub build_scripts_enabled: bool,
    /// File extensions (without the dot) that identify script files
    pub extensions: Vec<String>,
    /// File-name suffixes that identify build-tool script files
    pub build_script_suffixes: Vec<String>,
}

/// Workspace-membership rules beyond the built-in denylist.
#[derive(Debug, Clone)]
pub struct ExclusionsConfig {
    /// Directory names excluded in addition to the built-in denylist
    pub extra_excluded_dirs: Vec<String>,
    /// Name of the per-directory ignore-rule file
    pub ignore_file_name: String,
}

impl Default for ExclusionsConfig {
    fn default() -> Self {
        Self {
            extra_excluded_dirs: Vec::new(),
            ignore_file_name: ".gitignore".to_string(),
        }
    }
}

/// Symbol-index maintenance.
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    /// Whether the global symbol index is rebuilt after analysis
    pub enabled: bool,
    /// Whether namespaces that failed to enumerate are retried on the next
    /// rebuild. When false, a failed namespace stays skipped until the index
    /// is reset explicitly.
    pub retry_failed_namespaces: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_failed_namespaces: true,
        }
    }
}

/// Engine configuration, injected at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scripts: ScriptsConfig,
    pub exclusions: ExclusionsConfig,
    pub indexing: IndexingConfig,
    /// Quiescence window for edit-triggered re-analysis in milliseconds
    pub analysis_debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scripts: ScriptsConfig::default(),
            exclusions: ExclusionsConfig::default(),
            indexing: IndexingConfig::default(),
            analysis_debounce_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Log the effective configuration once at startup.
    pub fn log_at_startup(&self) {
        log::info!("Initializing workspace engine configuration:");
        log::info!("  scripts_enabled: {}", self.scripts.enabled);
        log::info!(
            "  build_scripts_enabled: {}",
            self.scripts.build_scripts_enabled
        );
        log::info!("  ignore_file_name: {}", self.exclusions.ignore_file_name);
        log::info!(
            "  extra_excluded_dirs: {:?}",
            self.exclusions.extra_excluded_dirs
        );
        log::info!("  indexing_enabled: {}", self.indexing.enabled);
        log::info!(
            "  retry_failed_namespaces: {}",
            self.indexing.retry_failed_namespaces
        );
        log::info!("  analysis_debounce_ms: {}", self.analysis_debounce_ms);
    }
}
