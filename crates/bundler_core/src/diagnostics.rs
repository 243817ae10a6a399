use std::sync::Arc;

use ahashmap::AHashSet;
use bundle_err::{BundleError, ErrorCode};
use logger::Logger;
use parking_lot::Mutex;

use crate::options::{InputOptions, WarnHandler};

/// Adapts any [`Logger`] into an `on_warn` handler, the usual way a host
/// surfaces build warnings.
pub fn logger_warn_handler<L: Logger + 'static>(logger: L) -> Arc<WarnHandler> {
    Arc::new(move |warning: &BundleError| {
        logger.warn(warning.to_string());
    })
}

/// Collects build warnings, deduplicates them per source location, and
/// forwards them to the user's handler. Shared across loader threads.
#[derive(Default)]
pub struct Diagnostics {
    inner: Mutex<DiagnosticsInner>,
    on_warn: Option<Arc<crate::options::WarnHandler>>,
    strict_deprecations: bool,
}

#[derive(Default)]
struct DiagnosticsInner {
    warnings: Vec<BundleError>,
    seen: AHashSet<String>,
}

impl Diagnostics {
    pub fn new(options: &InputOptions) -> Self {
        Self {
            inner: Mutex::default(),
            on_warn: options.on_warn.clone(),
            strict_deprecations: options.strict_deprecations,
        }
    }

    /// Emits a warning at most once per (code, module, location) key.
    pub fn warn(&self, warning: BundleError) {
        let key = dedup_key(&warning);
        {
            let mut inner = self.inner.lock();
            if !inner.seen.insert(key) {
                return;
            }
            if let Some(handler) = &self.on_warn {
                handler(&warning);
            }
            inner.warnings.push(warning);
        }
    }

    /// Deprecation warnings become fatal under `strict_deprecations`.
    pub fn deprecation(&self, message: &str) -> Result<(), BundleError> {
        let warning = bundle_err::deprecation(message);
        if self.strict_deprecations {
            return Err(warning);
        }
        self.warn(warning);
        Ok(())
    }

    pub fn warnings(&self) -> Vec<BundleError> {
        let inner = self.inner.lock();
        inner
            .warnings
            .iter()
            .map(|w| {
                let mut clone = BundleError::new(w.code, w.message.clone());
                clone.id = w.id.clone();
                clone.loc = w.loc.clone();
                clone.frame = w.frame.clone();
                clone.plugin = w.plugin.clone();
                clone.hook = w.hook.clone();
                clone
            })
            .collect()
    }

    pub fn has_warning(&self, code: ErrorCode) -> bool {
        self.inner.lock().warnings.iter().any(|w| w.code == code)
    }

    pub fn count(&self, code: ErrorCode) -> usize {
        self.inner
            .lock()
            .warnings
            .iter()
            .filter(|w| w.code == code)
            .count()
    }
}

fn dedup_key(warning: &BundleError) -> String {
    match (&warning.loc, &warning.id) {
        (Some(loc), _) => format!("{}|{}:{}:{}", warning.code, loc.file, loc.line, loc.column),
        (None, Some(id)) => format!("{}|{}|{}", warning.code, id, warning.message),
        (None, None) => format!("{}|{}", warning.code, warning.message),
    }
}

#[cfg(test)]
mod tests {
    use bundle_err::Locate;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn dedups_same_location() {
        let diagnostics = Diagnostics::default();
        let make = || {
            BundleError::new(ErrorCode::MissingExport, "x missing").with_loc(Locate {
                file: "a.js".into(),
                line: 1,
                column: 5,
            })
        };
        diagnostics.warn(make());
        diagnostics.warn(make());
        assert_eq!(diagnostics.warnings().len(), 1);
    }

    #[test]
    fn strict_deprecations_upgrade_to_errors() {
        let lenient = Diagnostics::default();
        assert!(lenient.deprecation("old option").is_ok());
        assert_eq!(lenient.count(ErrorCode::DeprecatedFeature), 1);

        let strict = Diagnostics::new(&InputOptions {
            strict_deprecations: true,
            ..Default::default()
        });
        let err = strict.deprecation("old option").unwrap_err();
        assert_eq!(err.code, ErrorCode::DeprecatedFeature);
    }

    #[test]
    fn warnings_flow_to_a_logger_handler() {
        let sink = logger::VecLogger::new();
        let options = InputOptions {
            on_warn: Some(logger_warn_handler(sink.clone())),
            ..Default::default()
        };
        let diagnostics = Diagnostics::new(&options);
        diagnostics.warn(BundleError::new(ErrorCode::UnresolvedImport, "missing"));
        let logs = sink.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("UNRESOLVED_IMPORT"));
    }

    #[test]
    fn distinct_messages_without_location_both_surface() {
        let diagnostics = Diagnostics::default();
        diagnostics.warn(BundleError::new(ErrorCode::CircularDependency, "a -> b -> a"));
        diagnostics.warn(BundleError::new(ErrorCode::CircularDependency, "b -> c -> b"));
        assert_eq!(diagnostics.count(ErrorCode::CircularDependency), 2);
    }
}
