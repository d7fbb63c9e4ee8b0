//! Left-to-right iteration over the trees of a tree sequence.

use std::collections::BTreeSet;

use crate::tables::{TableCollection, NULL};

/// Walks the trees of a tree sequence by applying edge removals
/// and insertions at each breakpoint.
///
/// ```ignore
/// let mut sweep = TreeSweep::new(&tables);
/// while sweep.advance() {
///     let (left, right) = sweep.interval();
///     // ...
/// }
/// ```
pub struct TreeSweep<'a> {
    tables: &'a TableCollection,
    insertion: Vec<usize>,
    removal: Vec<usize>,
    next_in: usize,
    next_out: usize,
    left: f64,
    right: f64,
    started: bool,
    parent: Vec<i32>,
    children: Vec<Vec<i32>>,
    // samples in the subtree below each node, the node included
    num_samples: Vec<u32>,
    roots: BTreeSet<i32>,
}

impl<'a> TreeSweep<'a> {
    pub fn new(tables: &'a TableCollection) -> Self {
        let edges = &tables.edges;
        let time = &tables.nodes.time;
        let parent_time = |e: usize| time[edges.parent[e] as usize];

        let mut insertion = (0..edges.num_rows()).collect::<Vec<_>>();
        insertion.sort_by(|&i, &j| {
            edges.left[i]
                .total_cmp(&edges.left[j])
                .then(parent_time(i).total_cmp(&parent_time(j)))
        });
        let mut removal = (0..edges.num_rows()).collect::<Vec<_>>();
        removal.sort_by(|&i, &j| {
            edges.right[i]
                .total_cmp(&edges.right[j])
                .then(parent_time(j).total_cmp(&parent_time(i)))
        });

        let num_nodes = tables.nodes.num_rows();
        let num_samples = (0..num_nodes)
            .map(|n| u32::from(tables.nodes.is_sample(n)))
            .collect::<Vec<_>>();
        let roots = (0..num_nodes)
            .filter(|&n| num_samples[n] > 0)
            .map(|n| n as i32)
            .collect();

        Self {
            tables,
            insertion,
            removal,
            next_in: 0,
            next_out: 0,
            left: 0.0,
            right: 0.0,
            started: false,
            parent: vec![NULL; num_nodes],
            children: vec![vec![]; num_nodes],
            num_samples,
            roots,
        }
    }

    fn could_be_root(&self, node: i32) -> bool {
        self.parent[node as usize] == NULL && self.num_samples[node as usize] > 0
    }

    fn update_root(&mut self, node: i32) {
        if self.could_be_root(node) {
            self.roots.insert(node);
        } else {
            self.roots.remove(&node);
        }
    }

    // Adds (or removes) `c`'s samples on the path from `p` to its
    // root, whose root status may change.
    fn propagate_samples(&mut self, p: i32, c: i32, insert: bool) {
        let k = self.num_samples[c as usize];
        let mut u = p;
        loop {
            let count = &mut self.num_samples[u as usize];
            if insert {
                *count += k;
            } else {
                debug_assert!(*count >= k);
                *count -= k;
            }
            let next = self.parent[u as usize];
            if next == NULL {
                break;
            }
            u = next;
        }
        self.update_root(u);
    }

    fn remove_edge(&mut self, e: usize) {
        let p = self.tables.edges.parent[e];
        let c = self.tables.edges.child[e];
        self.parent[c as usize] = NULL;
        self.children[p as usize].retain(|&x| x != c);
        self.propagate_samples(p, c, false);
        self.update_root(c);
    }

    fn insert_edge(&mut self, e: usize) {
        let p = self.tables.edges.parent[e];
        let c = self.tables.edges.child[e];
        self.parent[c as usize] = p;
        self.children[p as usize].push(c);
        self.propagate_samples(p, c, true);
        self.update_root(c);
    }

    /// Move to the next tree. Returns `false` once the whole
    /// sequence has been visited.
    pub fn advance(&mut self) -> bool {
        let sequence_length = self.tables.sequence_length;
        if self.started && self.right >= sequence_length {
            return false;
        }
        let x = self.right;
        let tables = self.tables;
        let edges = &tables.edges;
        while self.next_out < self.removal.len() && edges.right[self.removal[self.next_out]] == x
        {
            self.remove_edge(self.removal[self.next_out]);
            self.next_out += 1;
        }
        while self.next_in < self.insertion.len() && edges.left[self.insertion[self.next_in]] == x
        {
            self.insert_edge(self.insertion[self.next_in]);
            self.next_in += 1;
        }

        let mut right = sequence_length;
        if let Some(&e) = self.insertion.get(self.next_in) {
            right = right.min(edges.left[e]);
        }
        if let Some(&e) = self.removal.get(self.next_out) {
            right = right.min(edges.right[e]);
        }
        self.left = x;
        self.right = right;
        self.started = true;
        true
    }

    pub fn interval(&self) -> (f64, f64) {
        (self.left, self.right)
    }

    pub fn parent(&self, node: i32) -> i32 {
        self.parent[node as usize]
    }

    pub fn children(&self, node: i32) -> &[i32] {
        &self.children[node as usize]
    }

    /// Parentless nodes with at least one sample below them, the node
    /// itself included. Subtrees made only of non-sample nodes do not
    /// contribute roots.
    pub fn roots(&self) -> impl Iterator<Item = i32> + '_ {
        self.roots.iter().copied()
    }

    pub fn num_roots(&self) -> usize {
        self.roots.len()
    }

    /// Samples in the subtree below `node`, `node` included.
    pub fn num_samples(&self, node: i32) -> u32 {
        self.num_samples[node as usize]
    }

    /// No parent and no children in the current tree.
    pub fn is_isolated(&self, node: i32) -> bool {
        self.parent[node as usize] == NULL && self.children[node as usize].is_empty()
    }

    /// Nodes in the subtree below `node`, `node` included.
    pub fn subtree(&self, node: i32) -> Vec<i32> {
        let mut stack = vec![node];
        let mut rv = vec![];
        while let Some(u) = stack.pop() {
            rv.push(u);
            stack.extend_from_slice(&self.children[u as usize]);
        }
        rv
    }

    /// True if `ancestor` is `node` or lies above it.
    pub fn is_descendant(&self, node: i32, ancestor: i32) -> bool {
        let mut u = node;
        while u != NULL {
            if u == ancestor {
                return true;
            }
            u = self.parent[u as usize];
        }
        false
    }
}
