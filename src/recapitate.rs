//! Completing the ancestry of unfinished trees.
//!
//! The roots of a forward simulation's output are traced back in
//! time through a diploid Wright-Fisher population of constant size
//! until every position of the genome has a single ancestor.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rand::prelude::Rng;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::tables::{TableCollection, NULL};
use crate::trees::TreeSweep;

#[derive(Copy, Clone, Debug)]
pub struct RecapParams {
    /// Diploid population size
    pub ne: f64,
    /// Per base, per generation
    pub recombination_rate: f64,
}

impl RecapParams {
    pub fn validate(self) -> Result<Self> {
        if !self.ne.is_finite() || self.ne < 1.0 {
            return Err(Error::parameter(format!(
                "Ne must be finite and >= 1, got {}",
                self.ne
            )));
        }
        if !self.recombination_rate.is_finite() || self.recombination_rate < 0.0 {
            return Err(Error::parameter(format!(
                "recombination rate must be finite and >= 0, got {}",
                self.recombination_rate
            )));
        }
        Ok(self)
    }
}

/// A piece of ancestral material carried by a lineage.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Segment {
    left: f64,
    right: f64,
    node: i32,
}

// Appends, merging with the last segment when contiguous.
fn push_segment(segments: &mut Vec<Segment>, left: f64, right: f64, node: i32) {
    if let Some(last) = segments.last_mut() {
        if last.right == left && last.node == node {
            last.right = right;
            return;
        }
    }
    segments.push(Segment { left, right, node });
}

/// Genome coordinate ordered by `f64::total_cmp`, usable as a map key.
#[derive(Copy, Clone, Debug)]
struct Coord(f64);

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Coord {}

impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Number of lineages still carrying each position.
///
/// Runs are keyed by their left end and extend to the next key.
/// Positions down to a single lineage have found their root and
/// are stored as 0, and neighbouring runs with equal counts are
/// merged, so the map shrinks as recapitation proceeds.
#[derive(Debug)]
struct OverlapCounter {
    sequence_length: f64,
    runs: BTreeMap<Coord, u32>,
}

impl OverlapCounter {
    fn new(sequence_length: f64) -> Self {
        Self {
            sequence_length,
            runs: BTreeMap::from([(Coord(0.0), 0), (Coord(sequence_length), 0)]),
        }
    }

    fn split(&mut self, x: f64) {
        let key = Coord(x);
        if !self.runs.contains_key(&key) {
            let count = self.runs.range(..key).next_back().map_or(0, |(_, c)| *c);
            self.runs.insert(key, count);
        }
    }

    // Drops the keys in [left, right] whose run has the same count
    // as the run before it. The end of the genome always stays.
    fn coalesce(&mut self, left: f64, right: f64) {
        let mut previous = self.runs.range(..Coord(left)).next_back().map(|(_, c)| *c);
        let redundant = self
            .runs
            .range(Coord(left)..=Coord(right))
            .filter_map(|(k, c)| {
                let same = previous == Some(*c);
                previous = Some(*c);
                (same && k.0 < self.sequence_length).then_some(*k)
            })
            .collect::<Vec<_>>();
        for k in redundant {
            self.runs.remove(&k);
        }
    }

    fn update<F: FnMut(&mut u32)>(&mut self, left: f64, right: f64, f: F) {
        self.split(left);
        self.split(right);
        self.runs
            .range_mut(Coord(left)..Coord(right))
            .map(|(_, c)| c)
            .for_each(f);
        self.coalesce(left, right);
    }

    fn increment(&mut self, left: f64, right: f64, by: u32) {
        self.update(left, right, |c| *c += by);
    }

    /// `by` lineages merged into others over `[left, right)`.
    fn decrement(&mut self, left: f64, right: f64, by: u32) {
        self.update(left, right, |c| {
            debug_assert!(*c >= by);
            *c -= by;
            if *c == 1 {
                *c = 0;
            }
        });
    }

    /// `(left, right, count)` runs covering `[left, right)`
    fn runs(&mut self, left: f64, right: f64) -> Vec<(f64, f64, u32)> {
        self.split(left);
        self.split(right);
        let starts = self
            .runs
            .range(Coord(left)..=Coord(right))
            .map(|(k, c)| (k.0, *c))
            .collect::<Vec<_>>();
        self.coalesce(left, right);
        starts.windows(2).map(|w| (w[0].0, w[1].0, w[0].1)).collect()
    }

    fn num_runs(&self) -> usize {
        self.runs.len() - 1
    }
}

/// Crossover positions for one meiosis: a Poisson number of
/// breakpoints at uniform integer positions, sorted.
struct Meiosis {
    num_crossovers: Option<rand_distr::Poisson<f64>>,
    position_generator: Option<rand::distributions::Uniform<i64>>,
    breakpoints: Vec<f64>,
}

impl Meiosis {
    fn new(recombination_rate: f64, sequence_length: f64) -> Self {
        let length = sequence_length as i64;
        let position_generator = if length > 1 {
            Some(rand::distributions::Uniform::new(1, length))
        } else {
            None
        };
        Self {
            num_crossovers: rand_distr::Poisson::<f64>::new(recombination_rate * sequence_length)
                .ok(),
            position_generator,
            breakpoints: vec![],
        }
    }

    fn generate<R: Rng>(&mut self, rng: &mut R) -> &[f64] {
        self.breakpoints.clear();
        if let (Some(num), Some(pos)) = (self.num_crossovers, self.position_generator) {
            // Dangerous if mean is very large,
            // but of little practical consequence
            let n = rng.sample(num) as u32;
            for _ in 0..n {
                self.breakpoints.push(rng.sample(pos) as f64);
            }
            self.breakpoints.sort_by(|a, b| a.total_cmp(b));
        }
        &self.breakpoints
    }
}

/// Split a lineage's material between the two genomes of its parent.
/// `first` is the genome the leftmost material goes to; each
/// breakpoint swaps to the other genome.
fn transmit(lineage: &[Segment], breakpoints: &[f64], first: usize) -> [Vec<Segment>; 2] {
    let mut rv = [vec![], vec![]];
    for seg in lineage {
        let skip = breakpoints.partition_point(|b| *b <= seg.left);
        let mut genome = (first + skip) % 2;
        let mut left = seg.left;
        for &b in breakpoints[skip..].iter().take_while(|b| **b < seg.right) {
            if b > left {
                push_segment(&mut rv[genome], left, b, seg.node);
                left = b;
            }
            genome = 1 - genome;
        }
        push_segment(&mut rv[genome], left, seg.right, seg.node);
    }
    rv
}

#[derive(Copy, Clone, Debug)]
struct NewEdge {
    left: f64,
    right: f64,
    parent: i32,
    child: i32,
}

/// Records coalescences as new nodes and edges.
struct Coalescer {
    counter: OverlapCounter,
    next_node: i32,
    node_times: Vec<f64>,
    edges: Vec<NewEdge>,
}

impl Coalescer {
    /// Merge the material of several lineages that picked the same
    /// parental genome. Returns the material still in play.
    ///
    /// One left-to-right sweep over the segment endpoints; a segment
    /// is active from its left end until the window reaches its right.
    fn merge(&mut self, parts: Vec<Vec<Segment>>, time: f64) -> Vec<Segment> {
        let mut segments = parts.into_iter().flatten().collect::<Vec<_>>();
        segments.sort_by(|a, b| a.left.total_cmp(&b.left));
        let mut points = segments
            .iter()
            .flat_map(|s| [s.left, s.right])
            .collect::<Vec<_>>();
        points.sort_by(|a, b| a.total_cmp(b));
        points.dedup();

        let mut parent = None;
        let mut rv = vec![];
        let mut pending = segments.iter().peekable();
        let mut active: Vec<Segment> = vec![];
        for w in points.windows(2) {
            let (left, right) = (w[0], w[1]);
            active.retain(|s| s.right > left);
            while let Some(s) = pending.next_if(|s| s.left <= left) {
                active.push(*s);
            }
            match active.len() {
                0 => (),
                1 => push_segment(&mut rv, left, right, active[0].node),
                k => {
                    let p = *parent.get_or_insert_with(|| {
                        let id = self.next_node;
                        self.next_node += 1;
                        self.node_times.push(time);
                        id
                    });
                    for child in active.iter().map(|s| s.node) {
                        self.edges.push(NewEdge {
                            left,
                            right,
                            parent: p,
                            child,
                        });
                    }
                    self.counter.decrement(left, right, (k - 1) as u32);
                    for (a, b, count) in self.counter.runs(left, right) {
                        if count > 0 {
                            push_segment(&mut rv, a, b, p);
                        }
                    }
                }
            }
        }
        rv
    }

    // Contiguous edges between the same pair of nodes become one.
    fn squashed_edges(&self) -> Vec<NewEdge> {
        let mut edges = self.edges.clone();
        edges.sort_by(|a, b| {
            a.parent
                .cmp(&b.parent)
                .then(a.child.cmp(&b.child))
                .then(a.left.total_cmp(&b.left))
        });
        let mut rv: Vec<NewEdge> = Vec::with_capacity(edges.len());
        for e in edges {
            match rv.last_mut() {
                Some(last)
                    if last.parent == e.parent && last.child == e.child && last.right == e.left =>
                {
                    last.right = e.right
                }
                _ => rv.push(e),
            }
        }
        rv
    }
}

/// Root lineages of every tree with more than one root, plus
/// the initial per-position lineage counts. Trees that already
/// have a single root count as 0.
fn root_lineages(tables: &TableCollection) -> (Vec<Vec<Segment>>, OverlapCounter) {
    let mut counter = OverlapCounter::new(tables.sequence_length);
    let mut by_root: BTreeMap<i32, Vec<Segment>> = BTreeMap::new();
    let mut sweep = TreeSweep::new(tables);
    while sweep.advance() {
        let (left, right) = sweep.interval();
        if sweep.num_roots() < 2 {
            continue;
        }
        for root in sweep.roots() {
            push_segment(by_root.entry(root).or_default(), left, right, root);
        }
        counter.increment(left, right, sweep.num_roots() as u32);
    }
    (by_root.into_values().collect(), counter)
}

/// Largest number of roots in any tree.
pub fn max_num_roots(tables: &TableCollection) -> usize {
    let mut sweep = TreeSweep::new(tables);
    let mut rv = 0;
    while sweep.advance() {
        rv = rv.max(sweep.num_roots());
    }
    rv
}

/// Trace all roots back until every tree has a single root.
/// Input nodes and edges are kept; new nodes are appended and
/// the result is sorted.
pub fn recapitate<R: Rng>(
    tables: &TableCollection,
    params: RecapParams,
    rng: &mut R,
) -> Result<TableCollection> {
    let params = params.validate()?;
    let (mut lineages, counter) = root_lineages(tables);
    if lineages.is_empty() {
        info!("every tree has a single root, nothing to recapitate");
        return Ok(tables.clone());
    }

    let start_time = lineages
        .iter()
        .flatten()
        .map(|s| tables.nodes.time[s.node as usize])
        .fold(f64::NEG_INFINITY, f64::max);
    info!(
        lineages = lineages.len(),
        start_time,
        ne = params.ne,
        "recapitating"
    );

    let num_individuals = params.ne.round() as usize;
    let parent_picker = rand::distributions::Uniform::<usize>::new(0, num_individuals);
    let u01 = rand::distributions::Uniform::new(0., 1.);
    let mut meiosis = Meiosis::new(params.recombination_rate, tables.sequence_length);
    let mut coalescer = Coalescer {
        counter,
        next_node: tables.nodes.num_rows() as i32,
        node_times: vec![],
        edges: vec![],
    };

    let mut time = start_time;
    let mut generations = 0_u64;
    while !lineages.is_empty() {
        time += 1.0;
        generations += 1;
        // Keyed on (parent, genome) so that merge order
        // only depends on the random number stream.
        let mut families: BTreeMap<(usize, usize), Vec<Vec<Segment>>> = BTreeMap::new();
        for lineage in lineages.drain(..) {
            let parent = rng.sample(parent_picker);
            let first = usize::from(rng.sample(u01) < 0.5);
            let breakpoints = meiosis.generate(rng);
            let halves = transmit(&lineage, breakpoints, first);
            for (genome, half) in halves.into_iter().enumerate() {
                if !half.is_empty() {
                    families.entry((parent, genome)).or_default().push(half);
                }
            }
        }
        for (_, mut parts) in families {
            if parts.len() == 1 {
                lineages.extend(parts.pop());
            } else {
                let merged = coalescer.merge(parts, time);
                if !merged.is_empty() {
                    lineages.push(merged);
                }
            }
        }
        if generations % 1000 == 0 {
            debug!(
                generations,
                lineages = lineages.len(),
                runs = coalescer.counter.num_runs(),
                "still recapitating"
            );
        }
    }

    let mut rv = tables.clone();
    for t in &coalescer.node_times {
        rv.nodes.add_row(0, *t, NULL, NULL);
    }
    for e in coalescer.squashed_edges() {
        rv.edges.add_row(e.left, e.right, e.parent, e.child);
    }
    rv.sort();
    rv.check_integrity()?;
    info!(
        generations,
        nodes_added = coalescer.node_times.len(),
        tmrca = time,
        "recapitation done"
    );
    Ok(rv)
}
