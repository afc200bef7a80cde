//
// environment.rs
//
// Build-environment resolution with a persistent cache in front of the
// expensive external resolver
//

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::store::ObjectStore;

const CACHED_ENVIRONMENT_KEY: &str = "cached_environment";
const CACHED_BUILD_FILE_VERSION_KEY: &str = "cached_build_file_version";

/// A resolved build environment: the dependency entries source analysis
/// needs, stamped with the build-file version they were resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub entries: BTreeSet<PathBuf>,
    pub build_file_version: u64,
}

/// External build-environment resolver. Resolution is slow (it may shell
/// out to a build tool) and can fail.
pub trait EnvironmentResolver: Send + Sync {
    fn resolver_type(&self) -> &str;

    fn resolve(&self) -> anyhow::Result<BuildEnvironment>;

    /// Monotonic version of the build configuration files. A bump means
    /// dependencies may have changed and the cache must not be reused.
    fn current_build_file_version(&self) -> u64;
}

impl EnvironmentResolver for Box<dyn EnvironmentResolver> {
    fn resolver_type(&self) -> &str {
        self.as_ref().resolver_type()
    }

    fn resolve(&self) -> anyhow::Result<BuildEnvironment> {
        self.as_ref().resolve()
    }

    fn current_build_file_version(&self) -> u64 {
        self.as_ref().current_build_file_version()
    }
}

/// A resolver that caches another resolver.
///
/// Consults memory, then the object store, before delegating. Successful
/// resolutions are persisted together with the build-file version they were
/// resolved against. A failed resolution raises a sticky flag that stays
/// set until the next success, so callers can surface one persistent
/// diagnostic instead of retrying on every keystroke; the previously cached
/// environment remains served.
pub struct CachedEnvironmentResolver<R: EnvironmentResolver> {
    wrapped: R,
    store: Option<ObjectStore>,
    cached: Mutex<Option<BuildEnvironment>>,
    resolution_failed: AtomicBool,
}

impl<R: EnvironmentResolver> CachedEnvironmentResolver<R> {
    pub fn new(wrapped: R, store: Option<ObjectStore>) -> Self {
        let cached = store
            .as_ref()
            .and_then(|s| s.get_object::<BuildEnvironment>(CACHED_ENVIRONMENT_KEY));
        if cached.is_some() {
            log::debug!("Loaded build environment from persistent cache");
        }
        Self {
            wrapped,
            store,
            cached: Mutex::new(cached),
            resolution_failed: AtomicBool::new(false),
        }
    }

    pub fn resolver_type(&self) -> String {
        format!("cached+{}", self.wrapped.resolver_type())
    }

    /// The cached environment when still valid, otherwise a fresh
    /// resolution through the wrapped resolver.
    pub fn resolve(&self) -> anyhow::Result<BuildEnvironment> {
        if !self.dependencies_changed() {
            if let Some(environment) = self.cached.lock().unwrap().clone() {
                log::debug!("Reusing cached build environment");
                return Ok(environment);
            }
        }

        log::info!(
            "Resolving build environment via {}",
            self.wrapped.resolver_type()
        );
        match self.wrapped.resolve() {
            Ok(environment) => {
                self.update_cache(&environment);
                self.resolution_failed.store(false, Ordering::SeqCst);
                Ok(environment)
            }
            Err(err) => {
                self.resolution_failed.store(true, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Whether the most recent resolution attempt failed. Cleared by the
    /// next successful resolution.
    pub fn last_resolution_failed(&self) -> bool {
        self.resolution_failed.load(Ordering::SeqCst)
    }

    /// The environment most recently resolved or loaded, without
    /// triggering resolution.
    pub fn cached_environment(&self) -> Option<BuildEnvironment> {
        self.cached.lock().unwrap().clone()
    }

    fn update_cache(&self, environment: &BuildEnvironment) {
        *self.cached.lock().unwrap() = Some(environment.clone());
        if let Some(store) = &self.store {
            store.set_object(CACHED_ENVIRONMENT_KEY, environment);
            store.set_object(
                CACHED_BUILD_FILE_VERSION_KEY,
                &self.wrapped.current_build_file_version(),
            );
        }
    }

    fn dependencies_changed(&self) -> bool {
        let cached_version = self
            .cached
            .lock()
            .unwrap()
            .as_ref()
            .map(|environment| environment.build_file_version)
            .or_else(|| {
                self.store
                    .as_ref()
                    .and_then(|s| s.get_object::<u64>(CACHED_BUILD_FILE_VERSION_KEY))
            })
            .unwrap_or(0);
        cached_version < self.wrapped.current_build_file_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering::SeqCst;
    use std::sync::Arc;

    struct FakeResolver {
        calls: Arc<AtomicU64>,
        version: Arc<AtomicU64>,
        fail: Arc<AtomicBool>,
    }

    impl FakeResolver {
        fn new() -> (Self, Arc<AtomicU64>, Arc<AtomicU64>, Arc<AtomicBool>) {
            let calls = Arc::new(AtomicU64::new(0));
            let version = Arc::new(AtomicU64::new(1));
            let fail = Arc::new(AtomicBool::new(false));
            (
                Self {
                    calls: Arc::clone(&calls),
                    version: Arc::clone(&version),
                    fail: Arc::clone(&fail),
                },
                calls,
                version,
                fail,
            )
        }
    }

    impl EnvironmentResolver for FakeResolver {
        fn resolver_type(&self) -> &str {
            "fake"
        }

        fn resolve(&self) -> anyhow::Result<BuildEnvironment> {
            self.calls.fetch_add(1, SeqCst);
            if self.fail.load(SeqCst) {
                anyhow::bail!("build tool unavailable");
            }
            Ok(BuildEnvironment {
                entries: [PathBuf::from("/lib/core.jar")].into_iter().collect(),
                build_file_version: self.version.load(SeqCst),
            })
        }

        fn current_build_file_version(&self) -> u64 {
            self.version.load(SeqCst)
        }
    }

    #[test]
    fn test_second_resolve_is_served_from_cache() {
        let (fake, calls, _, _) = FakeResolver::new();
        let resolver = CachedEnvironmentResolver::new(fake, None);

        resolver.resolve().unwrap();
        resolver.resolve().unwrap();

        assert_eq!(calls.load(SeqCst), 1);
    }

    #[test]
    fn test_build_file_bump_forces_reresolution() {
        let (fake, calls, version, _) = FakeResolver::new();
        let resolver = CachedEnvironmentResolver::new(fake, None);

        resolver.resolve().unwrap();
        version.store(2, SeqCst);
        let environment = resolver.resolve().unwrap();

        assert_eq!(calls.load(SeqCst), 2);
        assert_eq!(environment.build_file_version, 2);
    }

    #[test]
    fn test_failure_flag_is_sticky_until_success() {
        let (fake, _, version, fail) = FakeResolver::new();
        let resolver = CachedEnvironmentResolver::new(fake, None);
        assert!(!resolver.last_resolution_failed());

        fail.store(true, SeqCst);
        assert!(resolver.resolve().is_err());
        assert!(resolver.last_resolution_failed());

        // Still set until a resolution actually succeeds.
        assert!(resolver.last_resolution_failed());

        fail.store(false, SeqCst);
        version.store(2, SeqCst);
        resolver.resolve().unwrap();
        assert!(!resolver.last_resolution_failed());
    }

    #[test]
    fn test_failure_keeps_previous_cached_environment() {
        let (fake, _, version, fail) = FakeResolver::new();
        let resolver = CachedEnvironmentResolver::new(fake, None);
        let first = resolver.resolve().unwrap();

        version.store(2, SeqCst);
        fail.store(true, SeqCst);
        assert!(resolver.resolve().is_err());

        assert_eq!(resolver.cached_environment(), Some(first));
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        let (fake, calls, _, _) = FakeResolver::new();
        let resolver = CachedEnvironmentResolver::new(fake, store.slice("envs"));
        resolver.resolve().unwrap();
        assert_eq!(calls.load(SeqCst), 1);

        // A fresh instance with the same store never hits the resolver.
        let (fake, calls, _, _) = FakeResolver::new();
        let resolver = CachedEnvironmentResolver::new(fake, store.slice("envs"));
        resolver.resolve().unwrap();
        assert_eq!(calls.load(SeqCst), 0);
    }
}
