//! Dependency ordering that tolerates cycles.
//!
//! Nodes get a level: one more than the highest level among the nodes they
//! (transitively) depend on. Nodes on a dependency cycle only look at their
//! acyclic dependencies, so members of one cycle usually share a level and
//! their relative order is the input order.

use std::collections::{BTreeMap, BTreeSet};

pub type Dependencies<T> = BTreeMap<T, BTreeSet<T>>;

/// Transitive closure of `dependencies` over every node it mentions.
fn closure<T: Ord + Clone>(dependencies: &Dependencies<T>) -> Dependencies<T> {
    let mut closed = dependencies.clone();
    for deps in dependencies.values() {
        for dep in deps {
            closed.entry(dep.clone()).or_default();
        }
    }
    loop {
        let mut changed = false;
        let nodes: Vec<T> = closed.keys().cloned().collect();
        for node in &nodes {
            let mut extra = BTreeSet::new();
            for dep in &closed[node] {
                extra.extend(closed[dep].difference(&closed[node]).cloned());
            }
            if !extra.is_empty() {
                changed = true;
                if let Some(deps) = closed.get_mut(node) {
                    deps.extend(extra);
                }
            }
        }
        if !changed {
            return closed;
        }
    }
}

fn levels<T: Ord + Clone>(closed: &Dependencies<T>) -> BTreeMap<T, usize> {
    let cyclic: BTreeSet<&T> = closed
        .iter()
        .filter(|(node, deps)| deps.contains(*node))
        .map(|(node, _)| node)
        .collect();
    let mut levels: BTreeMap<T, usize> = BTreeMap::new();
    loop {
        let mut progress = false;
        for (node, deps) in closed {
            if levels.contains_key(node) {
                continue;
            }
            let counted: Vec<&T> = if cyclic.contains(&node) {
                deps.iter().filter(|dep| !cyclic.contains(dep)).collect()
            } else {
                deps.iter().collect()
            };
            let resolved: Option<Vec<usize>> =
                counted.iter().map(|dep| levels.get(*dep).copied()).collect();
            if let Some(resolved) = resolved {
                let level = resolved.into_iter().max().map_or(0, |max| max + 1);
                levels.insert(node.clone(), level);
                progress = true;
            }
        }
        if !progress {
            return levels;
        }
    }
}

/// Sort `objects` so that every node comes after the nodes it depends on
/// (before them with `reverse`). Ties keep the input order.
pub fn sorted_dependencies<T: Ord + Clone>(
    dependencies: &Dependencies<T>,
    objects: &[T],
    reverse: bool,
) -> Vec<T> {
    let mut all = dependencies.clone();
    for object in objects {
        all.entry(object.clone()).or_default();
    }
    let levels = levels(&closure(&all));
    let level = |node: &T| levels.get(node).copied().unwrap_or(0);

    let mut sorted = objects.to_vec();
    if reverse {
        sorted.sort_by(|a, b| level(b).cmp(&level(a)));
    } else {
        sorted.sort_by_key(|node| level(node));
    }
    sorted
}
