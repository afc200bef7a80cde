// lib.rs — Workspace analysis engine for language servers.
//
// Keeps a continuously refreshed model of a multi-file workspace under
// rapid concurrent mutation: an incremental compiled-unit cache, a global
// symbol index rebuilt asynchronously and queried synchronously, single-
// owner task executors with debouncing, a persistent object store for
// expensive derived data, and workspace-membership filtering.
//
// The language frontend itself is an injected collaborator (see
// `analyzer`); so is the protocol layer, which delivers file events and
// consumes the query surface on `engine::WorkspaceEngine`.

pub mod analyzer;
pub mod config;
pub mod debouncer;
pub mod engine;
pub mod environment;
pub mod exclusion;
pub mod executor;
pub mod store;
pub mod symbols;
pub mod unit_cache;

pub use analyzer::{Analyzer, Declaration, DeclarationNode, ModuleAnalysis, RawVisibility};
pub use config::EngineConfig;
pub use debouncer::Debouncer;
pub use engine::WorkspaceEngine;
pub use environment::{BuildEnvironment, CachedEnvironmentResolver, EnvironmentResolver};
pub use exclusion::SourceFilter;
pub use executor::{TaskError, TaskExecutor, TaskHandle};
pub use store::ObjectStore;
pub use symbols::{SymbolEntry, SymbolIndex, SymbolKind, SymbolVisibility};
pub use unit_cache::{CompiledUnit, CompiledUnitCache};
