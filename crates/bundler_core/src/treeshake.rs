use std::collections::VecDeque;

use ahashmap::AHashSet;
use bundle_err::BundleResult;
use swc_ecma_ast::Id;

use crate::graph::{ExportTarget, Graph};
use crate::module::{ImportedName, ModuleIdx, ModuleRef, StmtIdx};
use crate::options::SideEffects;

/// One unit of inclusion work. The fixed point is reached when the queue
/// drains and a full executed-module sweep schedules nothing new.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Work {
    Execute(ModuleIdx),
    IncludeStmt(ModuleIdx, StmtIdx),
    UseVar(ModuleIdx, Id),
    UseExport(ModuleIdx, String),
    UseNamespace(ModuleIdx),
}

/// The ANALYSE inclusion pass: seeds execution from the entries, then
/// iterates statement inclusion and variable-use propagation until a full
/// pass changes nothing. Inclusion only ever grows.
pub fn run_inclusion_pass(graph: &mut Graph) -> BundleResult<()> {
    let mut shaker = Shaker {
        queue: VecDeque::new(),
        used_vars: AHashSet::default(),
        used_exports: AHashSet::default(),
        scheduled_stmts: AHashSet::default(),
        changed: false,
    };

    let entry_roots: Vec<ModuleIdx> = graph
        .entry_modules
        .iter()
        .chain(graph.implicit_entries.iter())
        .copied()
        .collect();

    for idx in &entry_roots {
        shaker.queue.push_back(Work::Execute(*idx));
    }

    // entries keep their export signature unless explicitly released
    for idx in entry_roots {
        if graph.modules[idx].preserve_signature != crate::options::PreserveSignature::False {
            for name in graph.export_names(idx) {
                shaker.queue.push_back(Work::UseExport(idx, name));
            }
        }
    }

    if !graph.options.treeshake.enabled {
        include_everything(graph, &mut shaker)?;
        return Ok(());
    }

    loop {
        shaker.drain(graph)?;

        // sweep: an executed module contributes every statement with
        // observable effects
        shaker.changed = false;
        let executed: Vec<ModuleIdx> = {
            let mut modules: Vec<ModuleIdx> = (0..graph.modules.len())
                .filter(|&i| graph.modules[i].executed)
                .collect();
            modules.sort_by_key(|&i| graph.modules[i].exec_index);
            modules
        };
        for idx in executed {
            let no_treeshake =
                graph.modules[idx].module_side_effects == SideEffects::NoTreeshake;
            let stmt_count = graph.modules[idx].statements.len();
            for stmt in 0..stmt_count {
                let record = &graph.modules[idx].statements[stmt];
                if record.included {
                    continue;
                }
                if no_treeshake || record.has_effects {
                    shaker.schedule_stmt(idx, stmt);
                }
            }
        }

        if !shaker.changed && shaker.queue.is_empty() {
            break;
        }
    }

    Ok(())
}

/// With tree shaking disabled every loaded module keeps its full body;
/// only the graph reachability decides what exists.
fn include_everything(graph: &mut Graph, shaker: &mut Shaker) -> BundleResult<()> {
    for idx in 0..graph.modules.len() {
        shaker.queue.push_back(Work::Execute(idx));
        for stmt in 0..graph.modules[idx].statements.len() {
            shaker.queue.push_back(Work::IncludeStmt(idx, stmt));
        }
    }
    shaker.drain(graph)
}

struct Shaker {
    queue: VecDeque<Work>,
    used_vars: AHashSet<(ModuleIdx, Id)>,
    used_exports: AHashSet<(ModuleIdx, String)>,
    scheduled_stmts: AHashSet<(ModuleIdx, StmtIdx)>,
    changed: bool,
}

impl Shaker {
    fn schedule_stmt(&mut self, module: ModuleIdx, stmt: StmtIdx) {
        if self.scheduled_stmts.insert((module, stmt)) {
            self.changed = true;
            self.queue.push_back(Work::IncludeStmt(module, stmt));
        }
    }

    fn drain(&mut self, graph: &mut Graph) -> BundleResult<()> {
        while let Some(work) = self.queue.pop_front() {
            match work {
                Work::Execute(idx) => self.execute_module(graph, idx),
                Work::IncludeStmt(idx, stmt) => self.include_statement(graph, idx, stmt)?,
                Work::UseVar(idx, id) => self.use_variable(graph, idx, id)?,
                Work::UseExport(idx, name) => self.use_export(graph, idx, &name)?,
                Work::UseNamespace(idx) => self.use_namespace(graph, idx)?,
            }
        }
        Ok(())
    }

    /// Marks a module's body as executing: its side-effectful dependencies
    /// execute transitively, and externals are kept for their effects.
    fn execute_module(&mut self, graph: &mut Graph, idx: ModuleIdx) {
        if graph.modules[idx].executed {
            return;
        }
        graph.modules[idx].executed = true;
        self.changed = true;

        let deps: Vec<ModuleRef> = graph.modules[idx].resolutions.iter().flatten().copied().collect();
        for dep in deps {
            match dep {
                ModuleRef::Module(dep_idx) => {
                    if graph.modules[dep_idx]
                        .module_side_effects
                        .executes_dependencies()
                    {
                        self.queue.push_back(Work::Execute(dep_idx));
                    }
                }
                ModuleRef::External(external_idx) => {
                    let external = &mut graph.externals[external_idx];
                    if !external.used {
                        external.used = true;
                        self.changed = true;
                    }
                    external.side_effect_imported = true;
                }
            }
        }
    }

    fn include_statement(
        &mut self,
        graph: &mut Graph,
        idx: ModuleIdx,
        stmt: StmtIdx,
    ) -> BundleResult<()> {
        self.scheduled_stmts.insert((idx, stmt));
        {
            let module = &mut graph.modules[idx];
            let record = &mut module.statements[stmt];
            if record.included {
                return Ok(());
            }
            record.included = true;
            module.included = true;
        }
        self.changed = true;
        self.queue.push_back(Work::Execute(idx));

        let references: Vec<Id> = graph.modules[idx].statements[stmt]
            .references
            .iter()
            .cloned()
            .collect();
        for id in references {
            self.queue.push_back(Work::UseVar(idx, id));
        }

        // an included dynamic import makes its target a dynamic entry
        if graph.modules[idx].statements[stmt].has_dynamic_import {
            let targets: Vec<ModuleRef> = graph.modules[idx]
                .dynamic_imports
                .iter()
                .filter(|d| d.stmt_index == stmt)
                .filter_map(|d| d.resolution)
                .collect();
            for target in targets {
                match target {
                    ModuleRef::Module(target_idx) => {
                        self.queue.push_back(Work::Execute(target_idx));
                        self.queue.push_back(Work::UseNamespace(target_idx));
                    }
                    ModuleRef::External(external_idx) => {
                        let external = &mut graph.externals[external_idx];
                        if !external.used {
                            external.used = true;
                            self.changed = true;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// A referenced top-level binding: either an import binding resolving
    /// across modules, or a plain local whose declaring statements must be
    /// included.
    fn use_variable(&mut self, graph: &mut Graph, idx: ModuleIdx, id: Id) -> BundleResult<()> {
        if !self.used_vars.insert((idx, id.clone())) {
            return Ok(());
        }
        match graph.resolve_import_reference(idx, &id)? {
            Some(target) => self.use_target(graph, target),
            None => {
                let stmts: Vec<StmtIdx> = graph.modules[idx].declaring_statements(&id).to_vec();
                for stmt in stmts {
                    self.schedule_stmt(idx, stmt);
                }
                Ok(())
            }
        }
    }

    fn use_export(&mut self, graph: &mut Graph, idx: ModuleIdx, name: &str) -> BundleResult<()> {
        if !self.used_exports.insert((idx, name.to_string())) {
            return Ok(());
        }
        let target = graph.resolve_export(idx, name)?;
        self.use_target(graph, target)
    }

    fn use_target(&mut self, graph: &mut Graph, target: ExportTarget) -> BundleResult<()> {
        match target {
            ExportTarget::Local { module, id, stmt } => {
                self.queue.push_back(Work::Execute(module));
                self.schedule_stmt(module, stmt);
                // the binding itself may be declared by other statements
                // (e.g. `var` split across declarations)
                self.queue.push_back(Work::UseVar(module, id));
            }
            ExportTarget::Default { module } => {
                self.queue.push_back(Work::Execute(module));
                if let Some(local) = graph.modules[module].local_exports.get("default") {
                    let stmt = local.stmt_index;
                    self.schedule_stmt(module, stmt);
                }
            }
            ExportTarget::Namespace { module } => {
                self.queue.push_back(Work::Execute(module));
                self.queue.push_back(Work::UseNamespace(module));
            }
            ExportTarget::External { external, name } => {
                let record = &mut graph.externals[external];
                let newly = match name {
                    ImportedName::Default => {
                        let first = !record.default_imported;
                        record.default_imported = true;
                        first
                    }
                    ImportedName::Namespace => {
                        let first = !record.namespace_imported;
                        record.namespace_imported = true;
                        first
                    }
                    ImportedName::Name(n) => record.imported_names.insert(n),
                };
                if !record.used || newly {
                    record.used = true;
                    self.changed = true;
                }
            }
            ExportTarget::Synthetic { module, name: _ } => {
                // synthetic named exports read off the fallback export
                let fallback = graph.modules[module]
                    .synthetic_named_exports
                    .fallback_export_name()
                    .unwrap_or("default")
                    .to_string();
                self.queue.push_back(Work::Execute(module));
                self.queue.push_back(Work::UseExport(module, fallback));
            }
            ExportTarget::Missing => {}
        }
        Ok(())
    }

    /// A used namespace includes the module's namespace object and, with
    /// it, every export the namespace exposes.
    fn use_namespace(&mut self, graph: &mut Graph, idx: ModuleIdx) -> BundleResult<()> {
        if !graph.modules[idx].namespace_included {
            graph.modules[idx].namespace_included = true;
            self.changed = true;
        } else {
            return Ok(());
        }
        self.queue.push_back(Work::Execute(idx));
        for name in graph.export_names(idx) {
            self.queue.push_back(Work::UseExport(idx, name));
        }
        Ok(())
    }
}
