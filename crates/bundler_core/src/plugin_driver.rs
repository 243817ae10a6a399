use std::sync::Arc;

use bundle_err::{BundleError, BundleResult};
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;

use crate::diagnostics::Diagnostics;
use crate::emit::FileEmitter;
use crate::plugin::{HookOrder, Plugin};

/// Bounds the number of concurrent file operations (plugin `load` hooks
/// and direct reads). The single shared concurrency-limited resource of
/// the pipeline.
pub struct FileOpGate {
    state: Mutex<usize>,
    available: Condvar,
    limit: usize,
}

impl FileOpGate {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(0),
            available: Condvar::new(),
            limit: limit.max(1),
        }
    }

    pub fn run<T>(&self, op: impl FnOnce() -> T) -> T {
        {
            let mut in_flight = self.state.lock();
            while *in_flight >= self.limit {
                self.available.wait(&mut in_flight);
            }
            *in_flight += 1;
        }
        let result = op();
        {
            let mut in_flight = self.state.lock();
            *in_flight -= 1;
        }
        self.available.notify_one();
        result
    }
}

/// Execution context handed to every hook invocation. Carries the shared
/// services a plugin may call back into.
pub struct PluginContext<'a> {
    pub(crate) driver: &'a PluginDriver,
    pub(crate) plugin_name: &'a str,
    pub(crate) hook: &'a str,
}

impl<'a> PluginContext<'a> {
    pub fn warn(&self, mut warning: BundleError) {
        warning.plugin.get_or_insert_with(|| self.plugin_name.to_string());
        self.driver.diagnostics.warn(warning);
    }

    /// Raises a fatal error attributed to the calling plugin.
    pub fn error(&self, error: BundleError) -> BundleError {
        BundleError::from_plugin(self.plugin_name, self.hook, error)
    }

    pub fn emit_file(&self, file: crate::plugin::EmittedFile) -> BundleResult<String> {
        self.driver.emitter.emit_file(file)
    }

    pub fn get_file_name(&self, reference_id: &str) -> BundleResult<String> {
        self.driver.emitter.get_file_name(reference_id)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.driver.diagnostics
    }
}

/// Owns the ordered plugin list and dispatches the four hook kinds:
/// first, sequential, parallel and reduce.
pub struct PluginDriver {
    plugins: Vec<Arc<dyn Plugin>>,
    pub diagnostics: Arc<Diagnostics>,
    pub emitter: Arc<FileEmitter>,
    pub file_gate: FileOpGate,
}

impl PluginDriver {
    pub fn new(
        plugins: Vec<Arc<dyn Plugin>>,
        diagnostics: Arc<Diagnostics>,
        emitter: Arc<FileEmitter>,
        max_parallel_file_ops: usize,
    ) -> Self {
        Self {
            plugins,
            diagnostics,
            emitter,
            file_gate: FileOpGate::new(max_parallel_file_ops),
        }
    }

    /// Plugin indices in dispatch order for `hook`: pre, then unordered,
    /// then post, stable within each class.
    fn ordered_indices(&self, hook: &str) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.plugins.len()).collect();
        indices.sort_by_key(|&i| match self.plugins[i].hook_order(hook) {
            HookOrder::Pre => 0u8,
            HookOrder::Normal => 1,
            HookOrder::Post => 2,
        });
        indices
    }

    fn context<'a>(&'a self, plugin_name: &'a str, hook: &'a str) -> PluginContext<'a> {
        PluginContext {
            driver: self,
            plugin_name,
            hook,
        }
    }

    /// First-result dispatch: returns the first `Some` a plugin produces;
    /// plugins named in `skip` are bypassed.
    pub fn hook_first<T>(
        &self,
        hook: &str,
        skip: &[&str],
        mut invoke: impl FnMut(&Arc<dyn Plugin>, &PluginContext) -> BundleResult<Option<T>>,
    ) -> BundleResult<Option<T>> {
        for i in self.ordered_indices(hook) {
            let plugin = &self.plugins[i];
            if skip.contains(&plugin.name()) {
                continue;
            }
            let ctx = self.context(plugin.name(), hook);
            match invoke(plugin, &ctx) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => continue,
                Err(error) => return Err(BundleError::from_plugin(plugin.name(), hook, error)),
            }
        }
        Ok(None)
    }

    /// Sequential dispatch: every plugin, in order, each completing before
    /// the next starts.
    pub fn hook_seq(
        &self,
        hook: &str,
        mut invoke: impl FnMut(&Arc<dyn Plugin>, &PluginContext) -> BundleResult<()>,
    ) -> BundleResult<()> {
        for i in self.ordered_indices(hook) {
            let plugin = &self.plugins[i];
            let ctx = self.context(plugin.name(), hook);
            invoke(plugin, &ctx)
                .map_err(|error| BundleError::from_plugin(plugin.name(), hook, error))?;
        }
        Ok(())
    }

    /// Parallel dispatch: all plugins fan out; a failure from any is
    /// propagated only after the others have completed.
    pub fn hook_parallel(
        &self,
        hook: &str,
        invoke: impl Fn(&Arc<dyn Plugin>, &PluginContext) -> BundleResult<()> + Sync,
    ) -> BundleResult<()> {
        let indices = self.ordered_indices(hook);
        let mut failures: Vec<BundleError> = indices
            .par_iter()
            .filter_map(|&i| {
                let plugin = &self.plugins[i];
                let ctx = self.context(plugin.name(), hook);
                invoke(plugin, &ctx)
                    .map_err(|error| BundleError::from_plugin(plugin.name(), hook, error))
                    .err()
            })
            .collect();
        match failures.is_empty() {
            true => Ok(()),
            false => Err(failures.remove(0)),
        }
    }

    /// Reduce dispatch: threads an accumulator through every plugin.
    pub fn hook_reduce<T>(
        &self,
        hook: &str,
        initial: T,
        mut invoke: impl FnMut(&Arc<dyn Plugin>, &PluginContext, T) -> BundleResult<T>,
    ) -> BundleResult<T> {
        let mut accumulator = initial;
        for i in self.ordered_indices(hook) {
            let plugin = &self.plugins[i];
            let ctx = self.context(plugin.name(), hook);
            accumulator = invoke(plugin, &ctx, accumulator)
                .map_err(|error| BundleError::from_plugin(plugin.name(), hook, error))?;
        }
        Ok(accumulator)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::options::InputOptions;
    use crate::plugin::PartialResolvedId;

    struct OrderProbe {
        name: String,
        order: HookOrder,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for OrderProbe {
        fn name(&self) -> &str {
            &self.name
        }
        fn hook_order(&self, _hook: &str) -> HookOrder {
            self.order
        }
        fn resolve_id(
            &self,
            _ctx: &PluginContext,
            _source: &str,
            _importer: Option<&str>,
            _is_entry: bool,
        ) -> BundleResult<Option<PartialResolvedId>> {
            self.calls.lock().push(self.name.clone());
            Ok(None)
        }
    }

    fn driver_with(plugins: Vec<Arc<dyn Plugin>>) -> PluginDriver {
        let options = InputOptions::default();
        PluginDriver::new(
            plugins,
            Arc::new(Diagnostics::new(&options)),
            Arc::new(FileEmitter::default()),
            4,
        )
    }

    #[test]
    fn pre_handlers_run_before_post() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let make = |name: &str, order| -> Arc<dyn Plugin> {
            Arc::new(OrderProbe {
                name: name.to_string(),
                order,
                calls: calls.clone(),
            })
        };
        let driver = driver_with(vec![
            make("late", HookOrder::Post),
            make("mid", HookOrder::Normal),
            make("early", HookOrder::Pre),
        ]);
        driver
            .hook_first("resolveId", &[], |p, ctx| p.resolve_id(ctx, "x", None, false))
            .unwrap();
        assert_eq!(*calls.lock(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn skip_list_bypasses_named_plugin() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let driver = driver_with(vec![Arc::new(OrderProbe {
            name: "skipped".to_string(),
            order: HookOrder::Normal,
            calls: calls.clone(),
        })]);
        driver
            .hook_first("resolveId", &["skipped"], |p, ctx| {
                p.resolve_id(ctx, "x", None, false)
            })
            .unwrap();
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn file_gate_limits_concurrency() {
        let gate = FileOpGate::new(2);
        let peak = AtomicUsize::new(0);
        let current = AtomicUsize::new(0);
        rayon::scope(|s| {
            for _ in 0..16 {
                s.spawn(|_| {
                    gate.run(|| {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(2));
                        current.fetch_sub(1, Ordering::SeqCst);
                    });
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
