//! Dependency graph over entity files.
//!
//! Nodes are keyed by canonical file path; an edge `A -> B` means `B` must
//! be committed before `A`. Ordering comes from a three-colour DFS that
//! reports cycles with the full offending path.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug)]
pub struct DependencyGraph<T> {
    nodes: IndexMap<Utf8PathBuf, Node<T>>,
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    deps: Vec<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown node: '{0}'")]
    UnknownNode(Utf8PathBuf),
    #[error("dependency cycle: {0}")]
    Cycle(CyclePath),
}

/// The nodes of a detected cycle; first and last entries are the same node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePath(pub Vec<Utf8PathBuf>);

impl std::fmt::Display for CyclePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for p in &self.0 {
            if !first {
                write!(f, " -> ")?;
            }
            write!(f, "{p}")?;
            first = false;
        }
        Ok(())
    }
}

impl CyclePath {
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.0.iter().any(|p| p == path)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

impl<T> Default for DependencyGraph<T> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }
}

impl<T> DependencyGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &Utf8Path) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &Utf8Path) -> Option<&T> {
        self.nodes.get(key).map(|n| &n.value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Utf8Path> {
        self.nodes.keys().map(Utf8PathBuf::as_path)
    }

    pub fn values(&self) -> impl Iterator<Item = (&Utf8Path, &T)> {
        self.nodes.iter().map(|(k, n)| (k.as_path(), &n.value))
    }

    /// Register a node. Idempotent: a second registration of the same key
    /// replaces the value and keeps the edges.
    pub fn add_node(&mut self, key: impl Into<Utf8PathBuf>, value: T) {
        match self.nodes.entry(key.into()) {
            indexmap::map::Entry::Occupied(mut e) => e.get_mut().value = value,
            indexmap::map::Entry::Vacant(e) => {
                e.insert(Node {
                    value,
                    deps: Vec::new(),
                });
            }
        }
    }

    /// Record that `from` depends on `to`. Both nodes must already exist.
    pub fn set_dependency(&mut self, from: &Utf8Path, to: &Utf8Path) -> Result<(), GraphError> {
        let to_idx = self
            .nodes
            .get_index_of(to)
            .ok_or_else(|| GraphError::UnknownNode(to.to_path_buf()))?;
        let from_node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| GraphError::UnknownNode(from.to_path_buf()))?;
        if !from_node.deps.contains(&to_idx) {
            from_node.deps.push(to_idx);
        }
        Ok(())
    }

    /// Everything `of` depends on, in DFS post-order (dependencies first,
    /// `of` itself last).
    pub fn dependencies(&self, of: &Utf8Path) -> Result<Vec<&Utf8Path>, GraphError> {
        let start = self
            .nodes
            .get_index_of(of)
            .ok_or_else(|| GraphError::UnknownNode(of.to_path_buf()))?;
        let mut colours = vec![Colour::White; self.nodes.len()];
        let mut path = Vec::new();
        let mut order = Vec::new();
        self.visit(start, &mut colours, &mut path, &mut order)
            .map_err(GraphError::Cycle)?;
        Ok(order.into_iter().map(|i| self.key(i)).collect())
    }

    /// A valid commit order over the whole graph, dependencies before
    /// dependents, stable with respect to insertion order.
    pub fn topological_order(&self) -> Result<Vec<&Utf8Path>, GraphError> {
        self.topological_order_excluding(&std::collections::HashSet::new())
    }

    /// Like [`Self::topological_order`] but treating the given nodes (and
    /// edges into them) as absent. Used to keep ordering the rest of the
    /// graph after a cycle has poisoned some of it.
    pub fn topological_order_excluding(
        &self,
        excluded: &std::collections::HashSet<Utf8PathBuf>,
    ) -> Result<Vec<&Utf8Path>, GraphError> {
        let excluded: Vec<bool> = self
            .nodes
            .keys()
            .map(|k| excluded.contains(k.as_path()))
            .collect();
        let mut colours = vec![Colour::White; self.nodes.len()];
        let mut order = Vec::new();
        for start in 0..self.nodes.len() {
            if colours[start] == Colour::White && !excluded[start] {
                let mut path = Vec::new();
                self.visit_excluding(start, &excluded, &mut colours, &mut path, &mut order)
                    .map_err(GraphError::Cycle)?;
            }
        }
        Ok(order.into_iter().map(|i| self.key(i)).collect())
    }

    fn visit(
        &self,
        idx: usize,
        colours: &mut [Colour],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), CyclePath> {
        let excluded = vec![false; self.nodes.len()];
        self.visit_excluding(idx, &excluded, colours, path, order)
    }

    fn visit_excluding(
        &self,
        idx: usize,
        excluded: &[bool],
        colours: &mut [Colour],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), CyclePath> {
        match colours[idx] {
            Colour::Black => Ok(()),
            Colour::Grey => {
                // back edge: the cycle is the grey path from the repeated
                // node down to here, closed with the node itself
                let start = path
                    .iter()
                    .position(|&i| i == idx)
                    .expect("grey node not on path");
                let mut cycle: Vec<Utf8PathBuf> = path[start..]
                    .iter()
                    .map(|&i| self.key(i).to_path_buf())
                    .collect();
                cycle.push(self.key(idx).to_path_buf());
                Err(CyclePath(cycle))
            }
            Colour::White => {
                colours[idx] = Colour::Grey;
                path.push(idx);
                let deps = self.nodes[idx].deps.clone();
                for dep in deps {
                    if excluded[dep] {
                        continue;
                    }
                    self.visit_excluding(dep, excluded, colours, path, order)?;
                }
                path.pop();
                colours[idx] = Colour::Black;
                order.push(idx);
                Ok(())
            }
        }
    }

    /// Backtracking search for a dependency path `from -> ... -> to`.
    /// Diagnostics only; `None` when no path exists.
    pub fn find_path(&self, from: &Utf8Path, to: &Utf8Path) -> Option<Vec<&Utf8Path>> {
        let from = self.nodes.get_index_of(from)?;
        let to = self.nodes.get_index_of(to)?;
        let mut visited = vec![false; self.nodes.len()];
        let mut path = Vec::new();
        if self.search(from, to, &mut visited, &mut path) {
            Some(path.into_iter().map(|i| self.key(i)).collect())
        } else {
            None
        }
    }

    fn search(&self, at: usize, to: usize, visited: &mut [bool], path: &mut Vec<usize>) -> bool {
        visited[at] = true;
        path.push(at);
        if at == to {
            return true;
        }
        for &dep in &self.nodes[at].deps {
            if !visited[dep] && self.search(dep, to, visited, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    fn key(&self, idx: usize) -> &Utf8Path {
        self.nodes
            .get_index(idx)
            .expect("node index out of range")
            .0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(paths: Vec<&Utf8Path>) -> Vec<&str> {
        paths.into_iter().map(Utf8Path::as_str).collect()
    }

    fn graph(edges: &[(&str, &str)]) -> DependencyGraph<()> {
        let mut g = DependencyGraph::new();
        for (from, to) in edges {
            g.add_node(*from, ());
            g.add_node(*to, ());
        }
        for (from, to) in edges {
            g.set_dependency(Utf8Path::new(from), Utf8Path::new(to))
                .unwrap();
        }
        g
    }

    #[test]
    fn post_order_puts_dependencies_first() {
        let g = graph(&[("a", "b"), ("b", "c")]);
        let order = strs(g.dependencies(Utf8Path::new("a")).unwrap());
        assert_eq!(order, ["c", "b", "a"]);
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut g = DependencyGraph::new();
        g.add_node("a", 1);
        g.add_node("b", 2);
        g.set_dependency(Utf8Path::new("a"), Utf8Path::new("b"))
            .unwrap();
        g.add_node("a", 3);
        assert_eq!(g.get(Utf8Path::new("a")), Some(&3));
        assert_eq!(strs(g.dependencies(Utf8Path::new("a")).unwrap()), ["b", "a"]);
    }

    #[test]
    fn missing_node_errors() {
        let mut g = graph(&[("a", "b")]);
        let err = g
            .set_dependency(Utf8Path::new("a"), Utf8Path::new("nope"))
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownNode("nope".into()));
        assert!(g.dependencies(Utf8Path::new("nope")).is_err());
    }

    #[test]
    fn two_node_cycle_reports_full_path() {
        let g = graph(&[("a", "b"), ("b", "a")]);
        let err = g.dependencies(Utf8Path::new("a")).unwrap_err();
        let GraphError::Cycle(cycle) = err else {
            panic!("expected cycle");
        };
        assert_eq!(cycle.0.first(), cycle.0.last());
        assert_eq!(cycle.to_string(), "a -> b -> a");
    }

    #[test]
    fn self_cycle() {
        let g = graph(&[("a", "a")]);
        let err = g.dependencies(Utf8Path::new("a")).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(c) if c.to_string() == "a -> a"));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let g = graph(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let order = strs(g.dependencies(Utf8Path::new("a")).unwrap());
        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), "a");
        let d_pos = order.iter().position(|p| *p == "d").unwrap();
        let b_pos = order.iter().position(|p| *p == "b").unwrap();
        assert!(d_pos < b_pos);
    }

    #[test]
    fn topological_order_covers_every_node() {
        let g = graph(&[("a", "b"), ("c", "b"), ("d", "a")]);
        let order = strs(g.topological_order().unwrap());
        assert_eq!(order.len(), 4);
        let pos = |k: &str| order.iter().position(|p| *p == k).unwrap();
        assert!(pos("b") < pos("a"));
        assert!(pos("b") < pos("c"));
        assert!(pos("a") < pos("d"));
    }

    #[test]
    fn excluding_cycle_members_keeps_the_rest_orderable() {
        let g = graph(&[("a", "b"), ("b", "a"), ("c", "d")]);
        assert!(g.topological_order().is_err());
        let skip: std::collections::HashSet<Utf8PathBuf> =
            ["a", "b"].into_iter().map(Utf8PathBuf::from).collect();
        let order = strs(g.topological_order_excluding(&skip).unwrap());
        assert_eq!(order, ["d", "c"]);
    }

    #[test]
    fn path_finding() {
        let g = graph(&[("a", "b"), ("b", "c"), ("a", "d")]);
        let path = strs(
            g.find_path(Utf8Path::new("a"), Utf8Path::new("c"))
                .unwrap(),
        );
        assert_eq!(path, ["a", "b", "c"]);
        assert!(g.find_path(Utf8Path::new("c"), Utf8Path::new("a")).is_none());
    }
}
