//
// analyzer.rs
//
// Boundary to the external analyzer: the engine schedules, caches, and
// indexes around these operations but never looks inside them
//

use std::path::{Path, PathBuf};

/// Visibility as reported by the analyzer, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawVisibility {
    /// Visible only inside the declaring scope itself
    PrivateToThis,
    Private,
    Internal,
    Protected,
    Public,
    /// Local to a function body or similar
    Local,
    Unknown,
}

/// The finite set of declaration shapes the engine classifies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeclarationNode {
    Class,
    Interface,
    Enum,
    EnumEntry,
    Function {
        /// Type name of the extension/receiver parameter, when present
        receiver: Option<String>,
    },
    Constructor,
    Variable {
        receiver: Option<String>,
    },
    Field,
    Namespace,
    TypeAlias,
    Unknown,
}

/// A declaration directly contributed by a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Declaration {
    /// Dot-delimited fully-qualified name
    pub fq_name: String,
    pub visibility: RawVisibility,
    pub node: DeclarationNode,
}

impl Declaration {
    pub fn new(fq_name: impl Into<String>, visibility: RawVisibility, node: DeclarationNode) -> Self {
        Self {
            fq_name: fq_name.into(),
            visibility,
            node,
        }
    }

    /// Last segment of the fully-qualified name.
    pub fn short_name(&self) -> &str {
        self.fq_name.rsplit('.').next().unwrap_or(&self.fq_name)
    }
}

/// Module-level analysis output, walkable as a namespace tree.
///
/// Listing the declarations of a single namespace may fail (a malformed or
/// partially resolved namespace); consumers are expected to skip such
/// namespaces rather than abort.
pub trait ModuleAnalysis: Send + Sync {
    /// Directly nested namespaces of `parent`. The module root is the empty
    /// string.
    fn child_namespaces(&self, parent: &str) -> Vec<String>;

    /// Declarations directly contributed by `namespace`.
    fn declarations(&self, namespace: &str) -> anyhow::Result<Vec<Declaration>>;
}

/// The external analyzer. Both operations are treated as opaque, possibly
/// slow, and possibly failing; the engine never retries them on its own.
pub trait Analyzer: Send + Sync + 'static {
    /// Per-file analysis result. Opaque to the engine: it is cached and
    /// served to query handlers verbatim.
    type Unit: Send + Sync + 'static;

    fn analyze_file(&self, path: &Path, content: &str) -> anyhow::Result<Self::Unit>;

    fn analyze_module(&self, files: &[PathBuf]) -> anyhow::Result<Box<dyn ModuleAnalysis>>;
}
