use ahashmap::{AHashMap, AHashSet};

use crate::graph::Graph;
use crate::module::{ModuleIdx, ModuleRef};

/// Depth-first execution-order analysis from the static entry points.
/// Assigns each module (and external) its post-order `exec_index` and
/// records static-import cycles. Dynamic-import targets and implicit
/// entries are traversed as additional roots afterwards, matching the
/// order side effects would occur in if everything were included.
pub fn analyse_execution_order(graph: &mut Graph) {
    let mut walker = ExecutionWalker {
        next_exec_index: 0,
        entered: AHashSet::default(),
        on_stack: AHashSet::default(),
        parent: AHashMap::default(),
        dynamic_roots: Vec::new(),
        cycle_keys: AHashSet::default(),
    };

    let static_roots: Vec<ModuleIdx> = graph
        .entry_modules
        .iter()
        .chain(graph.implicit_entries.iter())
        .copied()
        .collect();
    for root in static_roots {
        walker.walk(graph, root, None);
    }

    // additional roots: dynamic-import targets in discovery order
    let mut next_dynamic = 0;
    while next_dynamic < walker.dynamic_roots.len() {
        let root = walker.dynamic_roots[next_dynamic];
        next_dynamic += 1;
        walker.walk(graph, root, None);
    }
}

struct ExecutionWalker {
    next_exec_index: usize,
    entered: AHashSet<ModuleRef>,
    on_stack: AHashSet<ModuleIdx>,
    parent: AHashMap<ModuleIdx, Option<ModuleIdx>>,
    dynamic_roots: Vec<ModuleIdx>,
    cycle_keys: AHashSet<String>,
}

impl ExecutionWalker {
    /// Recursive DFS; module graphs are shallow enough in practice that
    /// recursion depth is not a concern here.
    fn walk(&mut self, graph: &mut Graph, idx: ModuleIdx, from: Option<ModuleIdx>) {
        if self.entered.contains(&ModuleRef::Module(idx)) {
            return;
        }
        self.entered.insert(ModuleRef::Module(idx));
        self.on_stack.insert(idx);
        self.parent.insert(idx, from);

        let (static_deps, dynamic_deps): (Vec<Option<ModuleRef>>, Vec<Option<ModuleRef>>) = {
            let module = &graph.modules[idx];
            (
                module.resolutions.clone(),
                module
                    .dynamic_imports
                    .iter()
                    .map(|d| d.resolution)
                    .collect(),
            )
        };

        for dep in static_deps.into_iter().flatten() {
            match dep {
                ModuleRef::External(external_idx) => {
                    if self.entered.insert(dep) {
                        graph.externals[external_idx].exec_index = self.next_exec_index;
                        self.next_exec_index += 1;
                    }
                }
                ModuleRef::Module(dep_idx) => {
                    if self.on_stack.contains(&dep_idx) {
                        self.record_cycle(graph, dep_idx, idx);
                    } else {
                        self.walk(graph, dep_idx, Some(idx));
                    }
                }
            }
        }

        for dep in dynamic_deps.into_iter().flatten() {
            if let ModuleRef::Module(dep_idx) = dep {
                if !self.entered.contains(&ModuleRef::Module(dep_idx)) {
                    self.dynamic_roots.push(dep_idx);
                }
            }
        }

        self.on_stack.remove(&idx);
        graph.modules[idx].exec_index = self.next_exec_index;
        self.next_exec_index += 1;
    }

    /// Builds the human-readable cycle path by walking parent pointers
    /// back from the importer to the dependency, then canonicalises by
    /// rotating the lexicographically smallest id to the front.
    fn record_cycle(&mut self, graph: &mut Graph, target: ModuleIdx, importer: ModuleIdx) {
        let mut chain = vec![importer];
        let mut cursor = importer;
        while cursor != target {
            match self.parent.get(&cursor).copied().flatten() {
                Some(parent) => {
                    chain.push(parent);
                    cursor = parent;
                }
                None => break,
            }
        }
        chain.reverse();

        let ids: Vec<String> = chain
            .iter()
            .map(|&idx| graph.modules[idx].id.clone())
            .collect();
        let rotated = canonical_rotation(&ids);

        let key = rotated.join("|");
        if !self.cycle_keys.insert(key) {
            return;
        }

        let mut path = rotated;
        path.push(path[0].clone());
        graph
            .diagnostics
            .warn(bundle_err::circular_dependency(&path));
        graph.cycle_paths.push(path);
    }
}

/// Rotates a cycle id list so the lexicographically least id comes first,
/// giving every distinct cycle exactly one representation.
fn canonical_rotation(ids: &[String]) -> Vec<String> {
    if ids.is_empty() {
        return Vec::new();
    }
    let min_position = ids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(ids.len());
    rotated.extend_from_slice(&ids[min_position..]);
    rotated.extend_from_slice(&ids[..min_position]);
    rotated
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::canonical_rotation;

    #[test]
    fn rotation_puts_least_id_first() {
        let ids = vec!["c.js".to_string(), "a.js".to_string(), "b.js".to_string()];
        assert_eq!(canonical_rotation(&ids), vec!["a.js", "b.js", "c.js"]);
    }

    #[test]
    fn rotation_is_stable_for_least_first_input() {
        let ids = vec!["a.js".to_string(), "b.js".to_string()];
        assert_eq!(canonical_rotation(&ids), vec!["a.js", "b.js"]);
    }
}
