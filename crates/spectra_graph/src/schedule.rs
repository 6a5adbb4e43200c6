// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution ordering.
//!
//! A [`Schedule`] is a topological order of a validated graph's stages. Among
//! stages whose dependencies are all ordered, the one inserted first goes
//! first, so recompiling an unchanged graph always yields the same order.
//! The schedule also exposes the dependency partial order, letting a host run
//! unrelated stages concurrently if it wants to.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Cached execution order of a validated graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    names: Vec<String>,
    order: Vec<usize>,
    dependencies: Vec<Vec<usize>>,
    generation: u64,
}

impl Schedule {
    /// Order an acyclic dependency graph.
    ///
    /// `dependencies[i]` lists the stages stage `i` reads from; indices are
    /// insertion indices.
    pub(crate) fn compute(names: Vec<String>, dependencies: Vec<Vec<usize>>, generation: u64) -> Self {
        let count = names.len();
        let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let dependents = invert(&dependencies);

        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &next in &dependents[index] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        debug_assert_eq!(order.len(), count, "schedule computed for a cyclic graph");

        Self {
            names,
            order,
            dependencies,
            generation,
        }
    }

    /// Stage names in execution order
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Stage insertion indices in execution order
    pub fn indices(&self) -> &[usize] {
        &self.order
    }

    /// Number of scheduled stages
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the schedule is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Topology generation this schedule was computed for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Position of a stage in the execution order
    pub fn position(&self, stage: &str) -> Option<usize> {
        let index = self.index_of(stage)?;
        self.order.iter().position(|&i| i == index)
    }

    /// Stages that `stage` reads from directly
    pub fn dependencies(&self, stage: &str) -> Vec<&str> {
        self.index_of(stage)
            .map(|i| {
                self.dependencies[i]
                    .iter()
                    .map(|&d| self.names[d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `stage` transitively depends on `other`
    pub fn depends_on(&self, stage: &str, other: &str) -> bool {
        let (Some(from), Some(target)) = (self.index_of(stage), self.index_of(other)) else {
            return false;
        };
        let mut visited = vec![false; self.names.len()];
        let mut stack = self.dependencies[from].clone();
        while let Some(index) = stack.pop() {
            if index == target {
                return true;
            }
            if !visited[index] {
                visited[index] = true;
                stack.extend_from_slice(&self.dependencies[index]);
            }
        }
        false
    }

    /// Whether neither stage is an ancestor of the other
    pub fn independent(&self, a: &str, b: &str) -> bool {
        a != b && !self.depends_on(a, b) && !self.depends_on(b, a)
    }

    /// Wavefronts of the partial order.
    ///
    /// Every stage's dependencies lie in earlier levels, so the stages within
    /// one level may run concurrently. Levels list stages in execution order.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut level = vec![0usize; self.names.len()];
        let mut levels: Vec<Vec<&str>> = Vec::new();
        for &index in &self.order {
            let depth = self.dependencies[index]
                .iter()
                .map(|&d| level[d] + 1)
                .max()
                .unwrap_or(0);
            level[index] = depth;
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(self.names[index].as_str());
        }
        levels
    }

    fn index_of(&self, stage: &str) -> Option<usize> {
        self.names.iter().position(|n| n == stage)
    }
}

/// Turn per-stage dependency lists into per-stage dependent lists
pub(crate) fn invert(dependencies: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut dependents = vec![Vec::new(); dependencies.len()];
    for (index, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(index);
        }
    }
    dependents
}

/// Find a cycle by depth-first traversal with an active-path set.
///
/// Roots are visited in insertion order and successors in ascending index
/// order. Returns the cycle's stages starting at the first stage reached
/// twice on the active path.
pub(crate) fn find_cycle(dependents: &[Vec<usize>]) -> Option<Vec<usize>> {
    fn visit(
        index: usize,
        dependents: &[Vec<usize>],
        done: &mut [bool],
        on_path: &mut [bool],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        if on_path[index] {
            let start = path.iter().position(|&i| i == index).unwrap_or(0);
            return Some(path[start..].to_vec());
        }
        if done[index] {
            return None;
        }

        on_path[index] = true;
        path.push(index);
        for &next in &dependents[index] {
            if let Some(cycle) = visit(next, dependents, done, on_path, path) {
                return Some(cycle);
            }
        }
        path.pop();
        on_path[index] = false;
        done[index] = true;
        None
    }

    let count = dependents.len();
    let mut done = vec![false; count];
    let mut on_path = vec![false; count];
    let mut path = Vec::new();
    (0..count).find_map(|root| visit(root, dependents, &mut done, &mut on_path, &mut path))
}
