//! Nested-dissection fill-reducing ordering.
//!
//! The symmetric adjacency graph of a sparse pattern is bisected recursively.
//! Each bisection takes a breadth-first level structure rooted at a
//! pseudo-peripheral vertex and uses its middle level as the vertex
//! separator; levels above and below it cannot be adjacent, so the two
//! halves are independent. Each half is ordered before its separator, which
//! makes the separator tree the elimination tree of the supernodes.

use std::collections::VecDeque;
use std::ops::Range;

use crate::linalg::sparse::SparseCsc;

/// Default size below which a subgraph is not split further.
pub const DEFAULT_LEAF_SIZE: usize = 64;

/// One node of the separator tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatorNode {
    /// New indices owned by this node (its separator, or the whole leaf).
    pub range: Range<usize>,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
}

/// Elimination structure produced alongside the ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeparatorTree {
    pub nodes: Vec<SeparatorNode>,
    /// Nodes without a parent. Disconnected graphs have several.
    pub roots: Vec<usize>,
}

impl SeparatorTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A symmetric permutation with its separator tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedDissection {
    /// `map[old] = new`.
    pub map: Vec<usize>,
    /// `inverse_map[new] = old`.
    pub inverse_map: Vec<usize>,
    pub tree: SeparatorTree,
}

struct Graph {
    adj_ptr: Vec<usize>,
    adj: Vec<usize>,
}

impl Graph {
    /// Symmetrized off-diagonal structure of a square pattern.
    fn from_pattern(pattern: &SparseCsc) -> Self {
        Self::from_edges(pattern.rows(), pattern.iter().map(|(_, rc)| rc))
    }

    /// Symmetrized graph of `n` vertices; self loops are dropped.
    fn from_edges<I>(n: usize, edges: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut lists: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (row, col) in edges {
            if row != col {
                lists[row].push(col);
                lists[col].push(row);
            }
        }
        let mut adj_ptr = Vec::with_capacity(n + 1);
        let mut adj = Vec::new();
        adj_ptr.push(0);
        for list in &mut lists {
            list.sort_unstable();
            list.dedup();
            adj.extend_from_slice(list);
            adj_ptr.push(adj.len());
        }
        Self { adj_ptr, adj }
    }

    fn neighbors(&self, v: usize) -> &[usize] {
        &self.adj[self.adj_ptr[v]..self.adj_ptr[v + 1]]
    }
}

struct Dissector<'g> {
    graph: &'g Graph,
    leaf_size: usize,
    in_set: Vec<bool>,
    level: Vec<usize>,
    order: Vec<usize>,
    tree: SeparatorTree,
}

const UNSEEN: usize = usize::MAX;

impl Dissector<'_> {
    fn mark(&mut self, set: &[usize], value: bool) {
        for &v in set {
            self.in_set[v] = value;
        }
    }

    /// BFS restricted to the marked set; returns the level sets.
    /// Leaves `self.level` set for the visited vertices.
    fn level_structure(&mut self, root: usize) -> Vec<Vec<usize>> {
        let mut levels: Vec<Vec<usize>> = vec![vec![root]];
        self.level[root] = 0;
        let mut queue = VecDeque::from([root]);
        while let Some(v) = queue.pop_front() {
            let lv = self.level[v];
            for &w in self.graph.neighbors(v) {
                if self.in_set[w] && self.level[w] == UNSEEN {
                    self.level[w] = lv + 1;
                    if levels.len() <= lv + 1 {
                        levels.push(Vec::new());
                    }
                    levels[lv + 1].push(w);
                    queue.push_back(w);
                }
            }
        }
        levels
    }

    fn reset_levels(&mut self, levels: &[Vec<usize>]) {
        for v in levels.iter().flatten() {
            self.level[*v] = UNSEEN;
        }
    }

    /// Split a marked set into connected components.
    fn components(&mut self, set: &[usize]) -> Vec<Vec<usize>> {
        let mut comps = Vec::new();
        for &v in set {
            if self.level[v] == UNSEEN {
                let levels = self.level_structure(v);
                comps.push(levels.into_iter().flatten().collect::<Vec<_>>());
            }
        }
        for comp in &comps {
            for &v in comp {
                self.level[v] = UNSEEN;
            }
        }
        comps
    }

    /// Level structure of a connected marked set rooted at a
    /// pseudo-peripheral vertex (repeated farthest-vertex sweeps).
    fn peripheral_levels(&mut self, start: usize) -> Vec<Vec<usize>> {
        let mut levels = self.level_structure(start);
        for _ in 0..8 {
            let last = levels.last().map(|l| l.as_slice()).unwrap_or(&[]);
            // Deepest vertex of minimum degree as the next candidate root.
            let candidate = last
                .iter()
                .copied()
                .min_by_key(|&v| self.graph.neighbors(v).iter().filter(|&&w| self.in_set[w]).count());
            let Some(candidate) = candidate else { break };
            self.reset_levels(&levels);
            let next = self.level_structure(candidate);
            let improved = next.len() > levels.len();
            levels = next;
            if !improved {
                break;
            }
        }
        levels
    }

    fn emit(&mut self, vertices: &[usize], children: Vec<usize>) -> usize {
        let start = self.order.len();
        self.order.extend_from_slice(vertices);
        let id = self.tree.nodes.len();
        for &c in &children {
            self.tree.nodes[c].parent = Some(id);
        }
        self.tree.nodes.push(SeparatorNode {
            range: start..self.order.len(),
            children,
            parent: None,
        });
        id
    }

    /// Order `set`; returns the tree nodes that became roots for it.
    fn dissect(&mut self, set: Vec<usize>) -> Vec<usize> {
        if set.is_empty() {
            return Vec::new();
        }
        if set.len() <= self.leaf_size {
            return vec![self.emit(&set, Vec::new())];
        }

        self.mark(&set, true);
        let comps = self.components(&set);
        if comps.len() > 1 {
            self.mark(&set, false);
            return comps.into_iter().flat_map(|c| self.dissect(c)).collect();
        }

        let levels = self.peripheral_levels(set[0]);
        self.reset_levels(&levels);
        self.mark(&set, false);

        if levels.len() < 3 {
            // Diameter too small to separate (dense block).
            return vec![self.emit(&set, Vec::new())];
        }

        // Middle level by vertex count, kept strictly inside.
        let half = set.len() / 2;
        let mut seen = 0;
        let mut mid = 1;
        for (k, level) in levels.iter().enumerate() {
            seen += level.len();
            if seen >= half {
                mid = k;
                break;
            }
        }
        let mid = mid.clamp(1, levels.len() - 2);

        let lower: Vec<usize> = levels[..mid].iter().flatten().copied().collect();
        let upper: Vec<usize> = levels[mid + 1..].iter().flatten().copied().collect();
        let separator = levels[mid].clone();

        let mut children = self.dissect(lower);
        children.extend(self.dissect(upper));
        vec![self.emit(&separator, children)]
    }
}

fn dissect_graph(graph: &Graph, n: usize, leaf_size: usize) -> (Vec<usize>, SeparatorTree) {
    let mut d = Dissector {
        graph,
        leaf_size: leaf_size.max(1),
        in_set: vec![false; n],
        level: vec![UNSEEN; n],
        order: Vec::with_capacity(n),
        tree: SeparatorTree::default(),
    };
    let roots = d.dissect((0..n).collect());
    let mut tree = d.tree;
    tree.roots = roots;
    (d.order, tree)
}

impl NestedDissection {
    /// Order the symmetric pattern of a square matrix.
    ///
    /// Only the pattern is read; either triangle (or both) may be stored.
    pub fn compute(pattern: &SparseCsc, leaf_size: usize) -> Self {
        assert_eq!(pattern.rows(), pattern.cols(), "ordering requires a square pattern");
        let graph = Graph::from_pattern(pattern);
        let (order, tree) = dissect_graph(&graph, pattern.rows(), leaf_size);
        Self::from_order(order, tree)
    }

    /// Order a pattern in which each pair `(first, second)` is kept together:
    /// the two vertices are contracted into one before dissection and `first`
    /// is numbered immediately before `second`.
    ///
    /// A vertex may belong to at most one pair.
    pub fn compute_paired(pattern: &SparseCsc, leaf_size: usize, pairs: &[(usize, usize)]) -> Self {
        assert_eq!(pattern.rows(), pattern.cols(), "ordering requires a square pattern");
        if pairs.is_empty() {
            return Self::compute(pattern, leaf_size);
        }
        let n = pattern.rows();

        let mut group = vec![UNSEEN; n];
        let mut members: Vec<Vec<usize>> = Vec::with_capacity(n.saturating_sub(pairs.len()));
        for &(first, second) in pairs {
            assert!(
                first != second && group[first] == UNSEEN && group[second] == UNSEEN,
                "vertex paired twice: ({}, {})",
                first,
                second
            );
            group[first] = members.len();
            group[second] = members.len();
            members.push(vec![first, second]);
        }
        for (v, g) in group.iter_mut().enumerate() {
            if *g == UNSEEN {
                *g = members.len();
                members.push(vec![v]);
            }
        }

        let graph = Graph::from_edges(
            members.len(),
            pattern.iter().map(|(_, (r, c))| (group[r], group[c])),
        );
        let (group_order, group_tree) = dissect_graph(&graph, members.len(), (leaf_size / 2).max(1));

        // start[k]: first new index of the k-th ordered group.
        let mut start = Vec::with_capacity(group_order.len() + 1);
        let mut order = Vec::with_capacity(n);
        for &g in &group_order {
            start.push(order.len());
            order.extend_from_slice(&members[g]);
        }
        start.push(order.len());

        let nodes = group_tree
            .nodes
            .into_iter()
            .map(|node| SeparatorNode {
                range: start[node.range.start]..start[node.range.end],
                ..node
            })
            .collect();
        let tree = SeparatorTree {
            nodes,
            roots: group_tree.roots,
        };
        Self::from_order(order, tree)
    }

    fn from_order(inverse_map: Vec<usize>, tree: SeparatorTree) -> Self {
        let mut map = vec![0; inverse_map.len()];
        for (new, &old) in inverse_map.iter().enumerate() {
            map[old] = new;
        }
        Self { map, inverse_map, tree }
    }

    /// The trivial ordering with a single leaf.
    pub fn identity(n: usize) -> Self {
        let tree = SeparatorTree {
            nodes: vec![SeparatorNode {
                range: 0..n,
                children: Vec::new(),
                parent: None,
            }],
            roots: vec![0],
        };
        Self {
            map: (0..n).collect(),
            inverse_map: (0..n).collect(),
            tree,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
