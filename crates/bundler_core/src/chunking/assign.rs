use ahashmap::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::graph::Graph;
use crate::module::{ModuleIdx, ModuleRef};
use crate::options::OutputOptions;

/// Result of partitioning the included modules: groups in deterministic
/// order, each becoming one chunk.
pub struct Assignment {
    pub groups: Vec<ModuleGroup>,
    /// Dynamic entry modules in discovery order.
    pub dynamic_entries: Vec<ModuleIdx>,
}

pub struct ModuleGroup {
    pub modules: Vec<ModuleIdx>,
    pub manual_alias: Option<String>,
}

/// Entry-signature chunk assignment.
///
/// Every module gets a signature string over the stable entry ordering:
/// position i holds `X` when entry i reaches the module, `_` otherwise.
/// Modules with equal signatures share a chunk. A dynamic entry only
/// contributes its own bit to modules whose current entry set is not
/// already a superset of the entries that dynamically import it, which
/// keeps isolation without needless splits.
pub fn assign_chunks(graph: &Graph, output_options: &OutputOptions) -> Assignment {
    let included: Vec<ModuleIdx> = {
        let mut modules: Vec<ModuleIdx> = (0..graph.modules.len())
            .filter(|&i| crate::chunking::is_chunkable(graph, i))
            .collect();
        modules.sort_by_key(|&i| graph.modules[i].exec_index);
        modules
    };

    let dynamic_entries = collect_dynamic_entries(graph, &included);

    // manual chunks claim modules first; claims are disjoint, first alias
    // wins
    let mut claimed: AHashMap<ModuleIdx, String> = AHashMap::default();
    if let Some(manual) = &output_options.manual_chunks {
        for &idx in &included {
            if let Some(alias) = manual(&graph.modules[idx].id) {
                claim_with_static_deps(graph, idx, &alias, &mut claimed);
            }
        }
    }

    // stable entry ordering: user entries, then dynamic entries, then
    // implicit entries
    let all_entry_points: Vec<EntryPoint> = graph
        .entry_modules
        .iter()
        .map(|&m| EntryPoint {
            module: m,
            dynamic: false,
        })
        .chain(dynamic_entries.iter().map(|&m| EntryPoint {
            module: m,
            dynamic: true,
        }))
        .chain(graph.implicit_entries.iter().map(|&m| EntryPoint {
            module: m,
            dynamic: false,
        }))
        .collect();

    let mut dependent_entries: AHashMap<ModuleIdx, AHashSet<usize>> = AHashMap::default();
    for (entry_position, entry) in all_entry_points.iter().enumerate() {
        if entry.dynamic {
            continue;
        }
        mark_reachable(graph, entry.module, entry_position, &mut dependent_entries);
    }

    // dynamic entries second, with the superset rule
    for (entry_position, entry) in all_entry_points.iter().enumerate() {
        if !entry.dynamic {
            continue;
        }
        let importer_entries = dynamic_importer_entries(graph, entry.module, &dependent_entries);
        mark_reachable_dynamic(
            graph,
            entry.module,
            entry_position,
            &importer_entries,
            &mut dependent_entries,
        );
    }

    // group by signature, preserving execution order of first members
    let mut groups: IndexMap<String, ModuleGroup> = IndexMap::new();
    for &idx in &included {
        if let Some(alias) = claimed.get(&idx) {
            let key = format!("manual:{}", alias);
            groups
                .entry(key)
                .or_insert_with(|| ModuleGroup {
                    modules: Vec::new(),
                    manual_alias: Some(alias.clone()),
                })
                .modules
                .push(idx);
            continue;
        }
        let signature: String = (0..all_entry_points.len())
            .map(|position| {
                let reached = dependent_entries
                    .get(&idx)
                    .map(|set| set.contains(&position))
                    .unwrap_or(false);
                if reached {
                    'X'
                } else {
                    '_'
                }
            })
            .collect();
        groups
            .entry(signature)
            .or_insert_with(|| ModuleGroup {
                modules: Vec::new(),
                manual_alias: None,
            })
            .modules
            .push(idx);
    }

    Assignment {
        groups: groups.into_values().collect(),
        dynamic_entries,
    }
}

struct EntryPoint {
    module: ModuleIdx,
    dynamic: bool,
}

/// A module is a dynamic entry when an included statement dynamically
/// imports it.
fn collect_dynamic_entries(graph: &Graph, included: &[ModuleIdx]) -> Vec<ModuleIdx> {
    let mut seen = AHashSet::default();
    let mut dynamic_entries = Vec::new();
    for &idx in included {
        let module = &graph.modules[idx];
        for dynamic in &module.dynamic_imports {
            if !module.statements[dynamic.stmt_index].included {
                continue;
            }
            if let Some(ModuleRef::Module(target)) = dynamic.resolution {
                if graph.modules[target].included && seen.insert(target) {
                    dynamic_entries.push(target);
                }
            }
        }
    }
    dynamic_entries
}

fn mark_reachable(
    graph: &Graph,
    from: ModuleIdx,
    entry_position: usize,
    dependent_entries: &mut AHashMap<ModuleIdx, AHashSet<usize>>,
) {
    let mut stack = vec![from];
    while let Some(idx) = stack.pop() {
        let entries = dependent_entries.entry(idx).or_default();
        if !entries.insert(entry_position) {
            continue;
        }
        for dep in graph.modules[idx].resolutions.iter().flatten() {
            if let ModuleRef::Module(dep_idx) = dep {
                if crate::chunking::is_chunkable(graph, *dep_idx) {
                    stack.push(*dep_idx);
                }
            }
        }
    }
}

/// The entry set of every module that dynamically imports `target`.
fn dynamic_importer_entries(
    graph: &Graph,
    target: ModuleIdx,
    dependent_entries: &AHashMap<ModuleIdx, AHashSet<usize>>,
) -> AHashSet<usize> {
    let mut entries = AHashSet::default();
    for &importer in &graph.modules[target].dynamic_importers {
        if let Some(importer_entries) = dependent_entries.get(&importer) {
            entries.extend(importer_entries.iter().copied());
        }
    }
    entries
}

fn mark_reachable_dynamic(
    graph: &Graph,
    from: ModuleIdx,
    entry_position: usize,
    importer_entries: &AHashSet<usize>,
    dependent_entries: &mut AHashMap<ModuleIdx, AHashSet<usize>>,
) {
    let mut stack = vec![from];
    let mut visited = AHashSet::default();
    while let Some(idx) = stack.pop() {
        if !visited.insert(idx) {
            continue;
        }
        {
            let entries = dependent_entries.entry(idx).or_default();
            // a module already guaranteed to be loaded with every dynamic
            // importer does not need the dynamic entry's bit
            let already_covered = !importer_entries.is_empty()
                && importer_entries.iter().all(|e| entries.contains(e));
            if !already_covered {
                entries.insert(entry_position);
            }
        }
        for dep in graph.modules[idx].resolutions.iter().flatten() {
            if let ModuleRef::Module(dep_idx) = dep {
                if crate::chunking::is_chunkable(graph, *dep_idx) {
                    stack.push(*dep_idx);
                }
            }
        }
    }
}

/// Greedy manual-chunk claim: the alias takes the module and its
/// not-yet-claimed non-external static dependencies.
fn claim_with_static_deps(
    graph: &Graph,
    root: ModuleIdx,
    alias: &str,
    claimed: &mut AHashMap<ModuleIdx, String>,
) {
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
        if claimed.contains_key(&idx) {
            continue;
        }
        claimed.insert(idx, alias.to_string());
        for dep in graph.modules[idx].resolutions.iter().flatten() {
            if let ModuleRef::Module(dep_idx) = dep {
                if crate::chunking::is_chunkable(graph, *dep_idx)
                    && !claimed.contains_key(dep_idx)
                {
                    stack.push(*dep_idx);
                }
            }
        }
    }
}
