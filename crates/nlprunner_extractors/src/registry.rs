//! `Extractor` trait and the name/version registry that binds an
//! `[nlpdef:NAME]` section's processor references to a running instance
//! (spec.md §4.2).

use crate::{ExtractionInput, ExtractionOutcome, ExtractorError};
use nlprunner_protocol::ProcessorDescriptor;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A processor capable of turning free text into structured rows.
///
/// `process_batch` returns a boxed future rather than using `async fn`
/// directly so `Extractor` stays object-safe — the `ExtractorRegistry`
/// holds `Arc<dyn Extractor>` because `RegexExtractor` runs inline while
/// `CoprocessExtractor`/`RemoteExtractor` drive real I/O.
pub trait Extractor: Send + Sync {
    fn describe(&self) -> ProcessorDescriptor;

    fn process_batch<'a>(
        &'a self,
        inputs: Vec<ExtractionInput>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ExtractionOutcome>, ExtractorError>> + Send + 'a>>;
}

/// Factory for constructing one named/versioned extractor instance from its
/// `[processor:NAME]` config section. Stored rather than the instance
/// itself so the same definition can be re-instantiated per worker shard
/// (spec.md §7 "Coordinator").
pub type ExtractorFactory = Arc<dyn Fn() -> Result<Arc<dyn Extractor>, ExtractorError> + Send + Sync>;

struct RegisteredExtractor {
    factory: ExtractorFactory,
    is_default_version: bool,
    /// `describe()` result, memoized after the first `list_descriptors()`
    /// call within this process — a remote processor's descriptor is a
    /// network round trip, and it doesn't change mid-run.
    descriptor_cache: std::sync::OnceLock<Option<ProcessorDescriptor>>,
}

/// Maps `(name, version)` to a factory, with a designated default version
/// per name for config entries that don't pin one (spec.md §4.2
/// "processor selection").
#[derive(Default)]
pub struct ExtractorRegistry {
    entries: HashMap<(String, String), RegisteredExtractor>,
    default_versions: HashMap<String, String>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, version: impl Into<String>, is_default_version: bool, factory: ExtractorFactory) {
        let name = name.into();
        let version = version.into();

        if is_default_version {
            self.default_versions.insert(name.clone(), version.clone());
        }
        self.entries.insert(
            (name, version),
            RegisteredExtractor {
                factory,
                is_default_version,
                descriptor_cache: std::sync::OnceLock::new(),
            },
        );
    }

    /// Resolve `name`/`version` (or the registered default version if
    /// `version` is `None`) and instantiate it.
    pub fn instantiate(&self, name: &str, version: Option<&str>) -> Result<Arc<dyn Extractor>, ExtractorError> {
        let resolved_version = match version {
            Some(v) => v.to_string(),
            None => self
                .default_versions
                .get(name)
                .cloned()
                .ok_or_else(|| ExtractorError::NotFound(name.to_string()))?,
        };

        let entry = self
            .entries
            .get(&(name.to_string(), resolved_version.clone()))
            .ok_or_else(|| ExtractorError::VersionNotFound {
                name: name.to_string(),
                version: resolved_version,
            })?;

        (entry.factory)()
    }

    pub fn list_descriptors(&self) -> Vec<ProcessorDescriptor> {
        self.entries
            .values()
            .filter_map(|entry| {
                entry
                    .descriptor_cache
                    .get_or_init(|| (entry.factory)().ok().map(|e| e.describe()))
                    .clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExtractionOutcome;

    struct Stub(&'static str, &'static str);

    impl Extractor for Stub {
        fn describe(&self) -> ProcessorDescriptor {
            ProcessorDescriptor::unknown_schema(self.0, self.0, self.1)
        }

        fn process_batch<'a>(
            &'a self,
            inputs: Vec<ExtractionInput>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<ExtractionOutcome>, ExtractorError>> + Send + 'a>> {
            Box::pin(async move {
                Ok(inputs
                    .into_iter()
                    .map(|i| ExtractionOutcome::success(i.record_id, Vec::new()))
                    .collect())
            })
        }
    }

    #[test]
    fn resolves_default_version_when_unspecified() {
        let mut registry = ExtractorRegistry::new();
        registry.register("crp_finder", "1.0", true, Arc::new(|| Ok(Arc::new(Stub("crp_finder", "1.0")) as Arc<dyn Extractor>)));
        registry.register("crp_finder", "2.0", false, Arc::new(|| Ok(Arc::new(Stub("crp_finder", "2.0")) as Arc<dyn Extractor>)));

        let resolved = registry.instantiate("crp_finder", None).unwrap();
        assert_eq!(resolved.describe().version, "1.0");
    }

    #[test]
    fn resolves_explicit_version_over_default() {
        let mut registry = ExtractorRegistry::new();
        registry.register("crp_finder", "1.0", true, Arc::new(|| Ok(Arc::new(Stub("crp_finder", "1.0")) as Arc<dyn Extractor>)));
        registry.register("crp_finder", "2.0", false, Arc::new(|| Ok(Arc::new(Stub("crp_finder", "2.0")) as Arc<dyn Extractor>)));

        let resolved = registry.instantiate("crp_finder", Some("2.0")).unwrap();
        assert_eq!(resolved.describe().version, "2.0");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = ExtractorRegistry::new();
        assert!(matches!(registry.instantiate("nope", None), Err(ExtractorError::NotFound(_))));
    }

    #[test]
    fn unknown_version_is_an_error() {
        let mut registry = ExtractorRegistry::new();
        registry.register("crp_finder", "1.0", true, Arc::new(|| Ok(Arc::new(Stub("crp_finder", "1.0")) as Arc<dyn Extractor>)));
        assert!(matches!(
            registry.instantiate("crp_finder", Some("9.9")),
            Err(ExtractorError::VersionNotFound { .. })
        ));
    }
}
