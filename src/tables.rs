//! Tree-sequence tables and their `.trees` file encoding.

use std::path::Path;

use rand::Rng;

use crate::error::{Error, Result};
use crate::kastore::Store;

pub const NULL: i32 = -1;
pub const NODE_IS_SAMPLE: u32 = 1;
pub const FILE_FORMAT_NAME: &[u8] = b"tskit.trees";
pub const FILE_FORMAT_VERSION: [u32; 2] = [12, 7];

const UNKNOWN_TIME_BITS: u64 = 0x7FF8_0000_0000_0001;

/// Mutation time marker used when the time is not known.
pub fn unknown_time() -> f64 {
    f64::from_bits(UNKNOWN_TIME_BITS)
}

// Files written by older tools may use any NaN.
pub fn is_unknown_time(time: f64) -> bool {
    time.is_nan()
}

/// A ragged column: row `i` is `data[offset[i]..offset[i + 1]]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Ragged<T> {
    data: Vec<T>,
    offset: Vec<usize>,
}

impl<T> Default for Ragged<T> {
    fn default() -> Self {
        Self {
            data: vec![],
            offset: vec![0],
        }
    }
}

impl<T: Clone> Ragged<T> {
    fn from_parts(key: &str, data: Vec<T>, offsets: Vec<u64>, num_rows: usize) -> Result<Self> {
        let bad = |what: &str| Error::tables(format!("{key}: {what}"));
        if offsets.len() != num_rows + 1 {
            return Err(bad("wrong number of offsets"));
        }
        if offsets[0] != 0 || !offsets.windows(2).all(|w| w[0] <= w[1]) {
            return Err(bad("offsets must start at 0 and be non-decreasing"));
        }
        if offsets[num_rows] != data.len() as u64 {
            return Err(bad("last offset does not match the data length"));
        }
        let offset = offsets
            .into_iter()
            .map(|o| usize::try_from(o).map_err(|_| bad("offset overflows")))
            .collect::<Result<Vec<usize>>>()?;
        Ok(Self { data, offset })
    }

    pub fn num_rows(&self) -> usize {
        self.offset.len() - 1
    }

    pub fn push(&mut self, row: &[T]) {
        self.data.extend_from_slice(row);
        self.offset.push(self.data.len());
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.data[self.offset[row]..self.offset[row + 1]]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn offsets_u64(&self) -> Vec<u64> {
        self.offset.iter().map(|o| *o as u64).collect()
    }

    /// Rebuild with rows taken in `order`.
    pub fn reorder(&self, order: &[usize]) -> Self {
        let mut rv = Self::default();
        for &i in order {
            rv.push(self.row(i));
        }
        rv
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeTable {
    pub flags: Vec<u32>,
    pub time: Vec<f64>,
    pub population: Vec<i32>,
    pub individual: Vec<i32>,
    pub metadata: Ragged<u8>,
}

impl NodeTable {
    pub fn num_rows(&self) -> usize {
        self.time.len()
    }

    pub fn add_row(&mut self, flags: u32, time: f64, population: i32, individual: i32) -> i32 {
        self.flags.push(flags);
        self.time.push(time);
        self.population.push(population);
        self.individual.push(individual);
        self.metadata.push(&[]);
        (self.time.len() - 1) as i32
    }

    pub fn is_sample(&self, node: usize) -> bool {
        self.flags[node] & NODE_IS_SAMPLE != 0
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeTable {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub parent: Vec<i32>,
    pub child: Vec<i32>,
    pub metadata: Ragged<u8>,
}

impl EdgeTable {
    pub fn num_rows(&self) -> usize {
        self.left.len()
    }

    pub fn add_row(&mut self, left: f64, right: f64, parent: i32, child: i32) -> i32 {
        self.left.push(left);
        self.right.push(right);
        self.parent.push(parent);
        self.child.push(child);
        self.metadata.push(&[]);
        (self.left.len() - 1) as i32
    }

    fn reorder(&self, order: &[usize]) -> Self {
        Self {
            left: order.iter().map(|&i| self.left[i]).collect(),
            right: order.iter().map(|&i| self.right[i]).collect(),
            parent: order.iter().map(|&i| self.parent[i]).collect(),
            child: order.iter().map(|&i| self.child[i]).collect(),
            metadata: self.metadata.reorder(order),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SiteTable {
    pub position: Vec<f64>,
    pub ancestral_state: Ragged<u8>,
    pub metadata: Ragged<u8>,
}

impl SiteTable {
    pub fn num_rows(&self) -> usize {
        self.position.len()
    }

    pub fn add_row(&mut self, position: f64, ancestral_state: &[u8]) -> i32 {
        self.position.push(position);
        self.ancestral_state.push(ancestral_state);
        self.metadata.push(&[]);
        (self.position.len() - 1) as i32
    }

    fn reorder(&self, order: &[usize]) -> Self {
        Self {
            position: order.iter().map(|&i| self.position[i]).collect(),
            ancestral_state: self.ancestral_state.reorder(order),
            metadata: self.metadata.reorder(order),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationTable {
    pub site: Vec<i32>,
    pub node: Vec<i32>,
    pub parent: Vec<i32>,
    pub time: Vec<f64>,
    pub derived_state: Ragged<u8>,
    pub metadata: Ragged<u8>,
}

impl MutationTable {
    pub fn num_rows(&self) -> usize {
        self.site.len()
    }

    pub fn add_row(
        &mut self,
        site: i32,
        node: i32,
        parent: i32,
        time: f64,
        derived_state: &[u8],
        metadata: &[u8],
    ) -> i32 {
        self.site.push(site);
        self.node.push(node);
        self.parent.push(parent);
        self.time.push(time);
        self.derived_state.push(derived_state);
        self.metadata.push(metadata);
        (self.site.len() - 1) as i32
    }

    /// Rows in `order`; `new_site` and `new_index` map old
    /// site and mutation ids to new ones.
    fn reorder(&self, order: &[usize], new_site: &[i32], new_index: &[i32]) -> Self {
        let remap_parent = |p: i32| if p == NULL { NULL } else { new_index[p as usize] };
        Self {
            site: order
                .iter()
                .map(|&i| new_site[self.site[i] as usize])
                .collect(),
            node: order.iter().map(|&i| self.node[i]).collect(),
            parent: order.iter().map(|&i| remap_parent(self.parent[i])).collect(),
            time: order.iter().map(|&i| self.time[i]).collect(),
            derived_state: self.derived_state.reorder(order),
            metadata: self.metadata.reorder(order),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndividualTable {
    pub flags: Vec<u32>,
    pub location: Ragged<f64>,
    pub parents: Ragged<i32>,
    pub metadata: Ragged<u8>,
}

impl IndividualTable {
    pub fn num_rows(&self) -> usize {
        self.flags.len()
    }

    pub fn add_row(&mut self, flags: u32) -> i32 {
        self.flags.push(flags);
        self.location.push(&[]);
        self.parents.push(&[]);
        self.metadata.push(&[]);
        (self.flags.len() - 1) as i32
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PopulationTable {
    pub metadata: Ragged<u8>,
}

impl PopulationTable {
    pub fn num_rows(&self) -> usize {
        self.metadata.num_rows()
    }

    pub fn add_row(&mut self, metadata: &[u8]) -> i32 {
        self.metadata.push(metadata);
        (self.metadata.num_rows() - 1) as i32
    }
}

// Keys decoded into the tables above. Every other key in
// a loaded file is carried through untouched, except the
// indexes, which are rebuilt on dump.
const MODELED_KEYS: &[&str] = &[
    "format/name",
    "format/version",
    "sequence_length",
    "nodes/flags",
    "nodes/time",
    "nodes/population",
    "nodes/individual",
    "nodes/metadata",
    "nodes/metadata_offset",
    "edges/left",
    "edges/right",
    "edges/parent",
    "edges/child",
    "edges/metadata",
    "edges/metadata_offset",
    "sites/position",
    "sites/ancestral_state",
    "sites/ancestral_state_offset",
    "sites/metadata",
    "sites/metadata_offset",
    "mutations/site",
    "mutations/node",
    "mutations/parent",
    "mutations/time",
    "mutations/derived_state",
    "mutations/derived_state_offset",
    "mutations/metadata",
    "mutations/metadata_offset",
    "individuals/flags",
    "individuals/location",
    "individuals/location_offset",
    "individuals/parents",
    "individuals/parents_offset",
    "individuals/metadata",
    "individuals/metadata_offset",
    "populations/metadata",
    "populations/metadata_offset",
    "indexes/edge_insertion_order",
    "indexes/edge_removal_order",
];

fn read_ragged_bytes(store: &Store, key: &str, num_rows: usize) -> Result<Ragged<u8>> {
    let offset_key = format!("{key}_offset");
    if !store.contains_key(key) && !store.contains_key(&offset_key) {
        let mut rv = Ragged::default();
        (0..num_rows).for_each(|_| rv.push(&[]));
        return Ok(rv);
    }
    Ragged::from_parts(
        key,
        store.get_bytes(key)?,
        store.get_offsets(&offset_key)?,
        num_rows,
    )
}

fn write_ragged_bytes(store: &mut Store, key: &str, column: &Ragged<u8>) {
    store.put_u8(key, column.data());
    store.put_u64(&format!("{key}_offset"), &column.offsets_u64());
}

fn check_len(key: &str, len: usize, num_rows: usize) -> Result<()> {
    if len == num_rows {
        Ok(())
    } else {
        Err(Error::tables(format!(
            "{key} has {len} rows, expected {num_rows}"
        )))
    }
}

fn random_uuid() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-4{}-a{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[13..16],
        &hex[17..20],
        &hex[20..32]
    )
}

/// A mutable tree sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableCollection {
    pub sequence_length: f64,
    pub nodes: NodeTable,
    pub edges: EdgeTable,
    pub sites: SiteTable,
    pub mutations: MutationTable,
    pub individuals: IndividualTable,
    pub populations: PopulationTable,
    passthrough: Store,
}

impl TableCollection {
    pub fn new(sequence_length: f64) -> Result<Self> {
        if !(sequence_length.is_finite() && sequence_length > 0.0) {
            return Err(Error::tables(format!(
                "sequence length must be positive, got {sequence_length}"
            )));
        }
        Ok(Self {
            sequence_length,
            ..Default::default()
        })
    }

    pub fn samples(&self) -> Vec<i32> {
        (0..self.nodes.num_rows())
            .filter(|&n| self.nodes.is_sample(n))
            .map(|n| n as i32)
            .collect()
    }

    /// Top-level metadata bytes, empty when absent.
    pub fn metadata(&self) -> Vec<u8> {
        self.passthrough.get_bytes("metadata").unwrap_or_default()
    }

    pub fn set_metadata(&mut self, metadata: &[u8]) {
        self.passthrough.put_u8("metadata", metadata);
    }

    /// Read a `.trees` file. With the `tskit` feature the tables are
    /// decoded by tskit.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        #[cfg(feature = "tskit")]
        {
            crate::tskit_io::load(path.as_ref())
        }
        #[cfg(not(feature = "tskit"))]
        {
            Self::from_store(Store::load(path)?)
        }
    }

    pub fn from_store(mut store: Store) -> Result<Self> {
        if store.get_bytes("format/name")? != FILE_FORMAT_NAME {
            return Err(Error::tables("not a tskit.trees file"));
        }
        let version = store.get_u32("format/version")?;
        if version.first() != Some(&FILE_FORMAT_VERSION[0]) {
            return Err(Error::tables(format!(
                "unsupported file format version {version:?}"
            )));
        }
        let sequence_length = match store.get_f64("sequence_length")?.as_slice() {
            [l] => *l,
            _ => return Err(Error::tables("sequence_length must hold one value")),
        };
        let mut tables = Self::new(sequence_length)?;

        let time = store.get_f64("nodes/time")?;
        let num_nodes = time.len();
        tables.nodes = NodeTable {
            flags: store.get_u32("nodes/flags")?,
            population: store.get_i32("nodes/population")?,
            individual: store.get_i32("nodes/individual")?,
            metadata: read_ragged_bytes(&store, "nodes/metadata", num_nodes)?,
            time,
        };
        check_len("nodes/flags", tables.nodes.flags.len(), num_nodes)?;
        check_len("nodes/population", tables.nodes.population.len(), num_nodes)?;
        check_len("nodes/individual", tables.nodes.individual.len(), num_nodes)?;

        let left = store.get_f64("edges/left")?;
        let num_edges = left.len();
        tables.edges = EdgeTable {
            right: store.get_f64("edges/right")?,
            parent: store.get_i32("edges/parent")?,
            child: store.get_i32("edges/child")?,
            metadata: read_ragged_bytes(&store, "edges/metadata", num_edges)?,
            left,
        };
        check_len("edges/right", tables.edges.right.len(), num_edges)?;
        check_len("edges/parent", tables.edges.parent.len(), num_edges)?;
        check_len("edges/child", tables.edges.child.len(), num_edges)?;

        let position = store.get_f64("sites/position")?;
        let num_sites = position.len();
        tables.sites = SiteTable {
            ancestral_state: read_ragged_bytes(&store, "sites/ancestral_state", num_sites)?,
            metadata: read_ragged_bytes(&store, "sites/metadata", num_sites)?,
            position,
        };

        let site = store.get_i32("mutations/site")?;
        let num_mutations = site.len();
        let mutation_time = if store.contains_key("mutations/time") {
            store.get_f64("mutations/time")?
        } else {
            vec![unknown_time(); num_mutations]
        };
        tables.mutations = MutationTable {
            node: store.get_i32("mutations/node")?,
            parent: store.get_i32("mutations/parent")?,
            time: mutation_time,
            derived_state: read_ragged_bytes(&store, "mutations/derived_state", num_mutations)?,
            metadata: read_ragged_bytes(&store, "mutations/metadata", num_mutations)?,
            site,
        };
        check_len("mutations/node", tables.mutations.node.len(), num_mutations)?;
        check_len("mutations/parent", tables.mutations.parent.len(), num_mutations)?;
        check_len("mutations/time", tables.mutations.time.len(), num_mutations)?;

        let flags = store.get_u32("individuals/flags")?;
        let num_individuals = flags.len();
        let location = Ragged::from_parts(
            "individuals/location",
            store.get_f64("individuals/location")?,
            store.get_offsets("individuals/location_offset")?,
            num_individuals,
        )?;
        let parents = if store.contains_key("individuals/parents") {
            Ragged::from_parts(
                "individuals/parents",
                store.get_i32("individuals/parents")?,
                store.get_offsets("individuals/parents_offset")?,
                num_individuals,
            )?
        } else {
            let mut rv = Ragged::default();
            (0..num_individuals).for_each(|_| rv.push(&[]));
            rv
        };
        tables.individuals = IndividualTable {
            flags,
            location,
            parents,
            metadata: read_ragged_bytes(&store, "individuals/metadata", num_individuals)?,
        };

        let offsets = store.get_offsets("populations/metadata_offset")?;
        let num_populations = offsets.len().saturating_sub(1);
        tables.populations = PopulationTable {
            metadata: Ragged::from_parts(
                "populations/metadata",
                store.get_bytes("populations/metadata")?,
                offsets,
                num_populations,
            )?,
        };

        tables.carry_through(store);
        tables.check_integrity()?;
        Ok(tables)
    }

    /// Keep the keys of `store` that the tables do not model, so
    /// that they are written back on dump.
    pub(crate) fn carry_through(&mut self, mut store: Store) {
        for key in MODELED_KEYS {
            store.remove(key);
        }
        self.passthrough = store;
    }

    #[cfg(feature = "tskit")]
    pub(crate) fn passthrough(&self) -> &Store {
        &self.passthrough
    }

    /// Referential and ordering checks a tree sequence must pass.
    pub fn check_integrity(&self) -> Result<()> {
        let num_nodes = self.nodes.num_rows() as i32;
        let num_sites = self.sites.num_rows() as i32;
        let in_range = |id: i32, n: i32| (0..n).contains(&id);
        for n in 0..self.nodes.num_rows() {
            let ind = self.nodes.individual[n];
            if ind != NULL && !in_range(ind, self.individuals.num_rows() as i32) {
                return Err(Error::tables(format!("node {n}: bad individual {ind}")));
            }
            let pop = self.nodes.population[n];
            if pop != NULL && !in_range(pop, self.populations.num_rows() as i32) {
                return Err(Error::tables(format!("node {n}: bad population {pop}")));
            }
            if !self.nodes.time[n].is_finite() {
                return Err(Error::tables(format!("node {n}: time is not finite")));
            }
        }
        for e in 0..self.edges.num_rows() {
            let (left, right) = (self.edges.left[e], self.edges.right[e]);
            let (parent, child) = (self.edges.parent[e], self.edges.child[e]);
            if !(0.0 <= left && left < right && right <= self.sequence_length) {
                return Err(Error::tables(format!(
                    "edge {e}: bad interval [{left}, {right})"
                )));
            }
            if !in_range(parent, num_nodes) || !in_range(child, num_nodes) {
                return Err(Error::tables(format!("edge {e}: node out of range")));
            }
            if self.nodes.time[parent as usize] <= self.nodes.time[child as usize] {
                return Err(Error::tables(format!(
                    "edge {e}: parent {parent} is not older than child {child}"
                )));
            }
        }
        for s in 0..self.sites.num_rows() {
            let x = self.sites.position[s];
            if !(0.0 <= x && x < self.sequence_length) {
                return Err(Error::tables(format!("site {s}: bad position {x}")));
            }
        }
        for m in 0..self.mutations.num_rows() {
            let site = self.mutations.site[m];
            let node = self.mutations.node[m];
            let parent = self.mutations.parent[m];
            if !in_range(site, num_sites) || !in_range(node, num_nodes) {
                return Err(Error::tables(format!("mutation {m}: bad site or node")));
            }
            if parent != NULL
                && (!in_range(parent, m as i32) || self.mutations.site[parent as usize] != site)
            {
                return Err(Error::tables(format!("mutation {m}: bad parent {parent}")));
            }
        }
        Ok(())
    }

    /// Sort edges, sites and mutations into the order
    /// a tree sequence requires.
    pub fn sort(&mut self) {
        let time = &self.nodes.time;
        let edges = &self.edges;
        let mut order = (0..edges.num_rows()).collect::<Vec<_>>();
        order.sort_by(|&i, &j| {
            time[edges.parent[i] as usize]
                .total_cmp(&time[edges.parent[j] as usize])
                .then(edges.parent[i].cmp(&edges.parent[j]))
                .then(edges.child[i].cmp(&edges.child[j]))
                .then(edges.left[i].total_cmp(&edges.left[j]))
        });
        self.edges = self.edges.reorder(&order);

        let mut site_order = (0..self.sites.num_rows()).collect::<Vec<_>>();
        site_order.sort_by(|&i, &j| self.sites.position[i].total_cmp(&self.sites.position[j]));
        let mut new_site = vec![NULL; site_order.len()];
        for (new, &old) in site_order.iter().enumerate() {
            new_site[old] = new as i32;
        }
        self.sites = self.sites.reorder(&site_order);

        let mutations = &self.mutations;
        let mut order = (0..mutations.num_rows()).collect::<Vec<_>>();
        order.sort_by_key(|&m| new_site[mutations.site[m] as usize]);
        // Within a site, older mutations first when every time is known.
        // Otherwise the existing order is kept.
        let mut start = 0;
        while start < order.len() {
            let site = new_site[mutations.site[order[start]] as usize];
            let stop = start
                + order[start..]
                    .iter()
                    .take_while(|&&m| new_site[mutations.site[m] as usize] == site)
                    .count();
            let run = &mut order[start..stop];
            if run.iter().all(|&m| !is_unknown_time(mutations.time[m])) {
                run.sort_by(|&i, &j| mutations.time[j].total_cmp(&mutations.time[i]));
            }
            start = stop;
        }
        let mut new_index = vec![NULL; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new as i32;
        }
        self.mutations = self.mutations.reorder(&order, &new_site, &new_index);
    }

    /// Remove the given sites and every mutation at them.
    pub fn delete_sites(&mut self, sites: &[i32]) {
        let mut keep = vec![true; self.sites.num_rows()];
        for &s in sites {
            if let Some(k) = keep.get_mut(s as usize) {
                *k = false;
            }
        }
        let site_order = (0..keep.len()).filter(|&s| keep[s]).collect::<Vec<_>>();
        let mut new_site = vec![NULL; keep.len()];
        for (new, &old) in site_order.iter().enumerate() {
            new_site[old] = new as i32;
        }

        let order = (0..self.mutations.num_rows())
            .filter(|&m| keep[self.mutations.site[m] as usize])
            .collect::<Vec<_>>();
        let mut new_index = vec![NULL; self.mutations.num_rows()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new as i32;
        }
        self.sites = self.sites.reorder(&site_order);
        self.mutations = self.mutations.reorder(&order, &new_site, &new_index);
    }

    fn edge_indexes(&self) -> (Vec<i32>, Vec<i32>) {
        let time = &self.nodes.time;
        let edges = &self.edges;
        let parent_time = |e: usize| time[edges.parent[e] as usize];

        let mut insertion = (0..edges.num_rows()).collect::<Vec<_>>();
        insertion.sort_by(|&i, &j| {
            edges.left[i]
                .total_cmp(&edges.left[j])
                .then(parent_time(i).total_cmp(&parent_time(j)))
                .then(edges.parent[i].cmp(&edges.parent[j]))
                .then(edges.child[i].cmp(&edges.child[j]))
        });
        let mut removal = (0..edges.num_rows()).collect::<Vec<_>>();
        removal.sort_by(|&i, &j| {
            edges.right[i]
                .total_cmp(&edges.right[j])
                .then(parent_time(j).total_cmp(&parent_time(i)))
                .then(edges.parent[j].cmp(&edges.parent[i]))
                .then(edges.child[j].cmp(&edges.child[i]))
        });
        let to_i32 = |v: Vec<usize>| v.into_iter().map(|e| e as i32).collect();
        (to_i32(insertion), to_i32(removal))
    }

    pub fn to_store(&self) -> Store {
        let mut store = self.passthrough.clone();

        store.put_u8("format/name", FILE_FORMAT_NAME);
        store.put_u32("format/version", &FILE_FORMAT_VERSION);
        store.put_f64("sequence_length", &[self.sequence_length]);
        if !store.contains_key("uuid") {
            store.put_u8("uuid", random_uuid().as_bytes());
        }

        store.put_u32("nodes/flags", &self.nodes.flags);
        store.put_f64("nodes/time", &self.nodes.time);
        store.put_i32("nodes/population", &self.nodes.population);
        store.put_i32("nodes/individual", &self.nodes.individual);
        write_ragged_bytes(&mut store, "nodes/metadata", &self.nodes.metadata);

        store.put_f64("edges/left", &self.edges.left);
        store.put_f64("edges/right", &self.edges.right);
        store.put_i32("edges/parent", &self.edges.parent);
        store.put_i32("edges/child", &self.edges.child);
        write_ragged_bytes(&mut store, "edges/metadata", &self.edges.metadata);

        store.put_f64("sites/position", &self.sites.position);
        write_ragged_bytes(&mut store, "sites/ancestral_state", &self.sites.ancestral_state);
        write_ragged_bytes(&mut store, "sites/metadata", &self.sites.metadata);

        store.put_i32("mutations/site", &self.mutations.site);
        store.put_i32("mutations/node", &self.mutations.node);
        store.put_i32("mutations/parent", &self.mutations.parent);
        store.put_f64("mutations/time", &self.mutations.time);
        write_ragged_bytes(
            &mut store,
            "mutations/derived_state",
            &self.mutations.derived_state,
        );
        write_ragged_bytes(&mut store, "mutations/metadata", &self.mutations.metadata);

        store.put_u32("individuals/flags", &self.individuals.flags);
        store.put_f64("individuals/location", self.individuals.location.data());
        store.put_u64(
            "individuals/location_offset",
            &self.individuals.location.offsets_u64(),
        );
        store.put_i32("individuals/parents", self.individuals.parents.data());
        store.put_u64(
            "individuals/parents_offset",
            &self.individuals.parents.offsets_u64(),
        );
        write_ragged_bytes(&mut store, "individuals/metadata", &self.individuals.metadata);

        write_ragged_bytes(&mut store, "populations/metadata", &self.populations.metadata);

        // Tables this crate never touches still have to be present.
        if !store.contains_key("migrations/left") {
            for key in ["migrations/left", "migrations/right", "migrations/time"] {
                store.put_f64(key, &[]);
            }
            for key in ["migrations/node", "migrations/source", "migrations/dest"] {
                store.put_i32(key, &[]);
            }
            write_ragged_bytes(&mut store, "migrations/metadata", &Ragged::default());
        }
        if !store.contains_key("provenances/timestamp") {
            write_ragged_bytes(&mut store, "provenances/timestamp", &Ragged::default());
            write_ragged_bytes(&mut store, "provenances/record", &Ragged::default());
        }

        let (insertion, removal) = self.edge_indexes();
        store.put_i32("indexes/edge_insertion_order", &insertion);
        store.put_i32("indexes/edge_removal_order", &removal);
        store
    }

    /// Write a `.trees` file. With the `tskit` feature the file is
    /// written by tskit.
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        #[cfg(feature = "tskit")]
        {
            crate::tskit_io::dump(self, path.as_ref())
        }
        #[cfg(not(feature = "tskit"))]
        {
            self.to_store().dump(path)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::two_trees;
    use super::*;

    #[test]
    fn test_dump_load_round_trip() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(5.0, b"A");
        tables.mutations.add_row(s, 4, NULL, 2.0, b"T", &[]);
        tables.mutations.add_row(s, 0, 0, 0.5, b"G", b"meta");
        tables.populations.add_row(b"{}");
        let i = tables.individuals.add_row(0);
        tables.nodes.individual[0] = i;
        tables.set_metadata(b"{\"x\": 1}");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.trees");
        tables.dump(&path).unwrap();
        let back = TableCollection::load(&path).unwrap();

        assert_eq!(back.sequence_length, 20.0);
        assert_eq!(back.nodes, tables.nodes);
        assert_eq!(back.edges, tables.edges);
        assert_eq!(back.sites, tables.sites);
        assert_eq!(back.mutations, tables.mutations);
        assert_eq!(back.individuals, tables.individuals);
        assert_eq!(back.populations, tables.populations);
        assert_eq!(back.metadata(), b"{\"x\": 1}".to_vec());
        assert_eq!(back.samples(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_written_store_has_required_keys() {
        let store = two_trees().to_store();
        for key in [
            "uuid",
            "indexes/edge_insertion_order",
            "indexes/edge_removal_order",
            "migrations/left",
            "provenances/record_offset",
        ] {
            assert!(store.contains_key(key), "{key}");
        }
        assert_eq!(store.get_bytes("uuid").unwrap().len(), 36);
    }

    #[test]
    fn test_edge_indexes() {
        let tables = two_trees();
        let (insertion, removal) = tables.edge_indexes();
        let lefts = insertion
            .iter()
            .map(|&e| tables.edges.left[e as usize])
            .collect::<Vec<_>>();
        assert!(lefts.windows(2).all(|w| w[0] <= w[1]));
        let rights = removal
            .iter()
            .map(|&e| tables.edges.right[e as usize])
            .collect::<Vec<_>>();
        assert!(rights.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_sort_orders_edges_by_parent_time() {
        let tables = two_trees();
        let times = tables
            .edges
            .parent
            .iter()
            .map(|&p| tables.nodes.time[p as usize])
            .collect::<Vec<_>>();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_sort_remaps_mutation_parents() {
        let mut tables = two_trees();
        let s1 = tables.sites.add_row(15.0, b"0");
        let s0 = tables.sites.add_row(5.0, b"0");
        tables.mutations.add_row(s1, 5, NULL, 2.0, b"1", &[]);
        tables.mutations.add_row(s0, 4, NULL, 2.0, b"1", &[]);
        tables.mutations.add_row(s0, 0, 1, 0.5, b"0", &[]);
        tables.sort();
        assert_eq!(tables.sites.position, vec![5.0, 15.0]);
        assert_eq!(tables.mutations.site, vec![0, 0, 1]);
        assert_eq!(tables.mutations.node, vec![4, 0, 5]);
        assert_eq!(tables.mutations.parent, vec![NULL, 0, NULL]);
        tables.check_integrity().unwrap();
    }

    #[test]
    fn test_delete_sites() {
        let mut tables = two_trees();
        for (x, node) in [(1.0, 0), (2.0, 1), (12.0, 2)] {
            let s = tables.sites.add_row(x, b"0");
            tables.mutations.add_row(s, node, NULL, 0.5, b"1", &[]);
        }
        let s = tables.sites.position.len() as i32 - 1;
        tables.mutations.add_row(s, 2, 2, 0.25, b"0", &[]);
        tables.delete_sites(&[0]);
        assert_eq!(tables.sites.position, vec![2.0, 12.0]);
        assert_eq!(tables.mutations.site, vec![0, 1, 1]);
        assert_eq!(tables.mutations.parent, vec![NULL, NULL, 1]);
        tables.check_integrity().unwrap();
    }

    #[test]
    fn test_integrity_failures() {
        let mut tables = two_trees();
        tables.edges.add_row(0.0, 30.0, 6, 3);
        assert!(tables.check_integrity().is_err());

        let mut tables = two_trees();
        tables.edges.add_row(0.0, 5.0, 0, 6);
        assert!(tables.check_integrity().is_err());

        let mut tables = two_trees();
        tables.sites.add_row(20.0, b"");
        assert!(tables.check_integrity().is_err());
    }

    #[test]
    fn test_not_a_trees_file() {
        let mut store = Store::new();
        store.put_u8("format/name", b"something.else");
        assert!(TableCollection::from_store(store).is_err());
    }

    #[test]
    fn test_other_format_version_is_rejected() {
        for version in [[11_u32, 0], [13, 0]] {
            let mut store = two_trees().to_store();
            store.put_u32("format/version", &version);
            match TableCollection::from_store(store) {
                Err(Error::Tables { message }) => assert!(message.contains("version"), "{message}"),
                other => panic!("unexpected {other:?}"),
            }
        }
        let mut store = two_trees().to_store();
        store.put_u32("format/version", &[12, 99]);
        assert!(TableCollection::from_store(store).is_ok());
    }

    #[test]
    fn test_32_bit_offsets() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(5.0, b"AC");
        tables.mutations.add_row(s, 4, NULL, 2.0, b"T", b"md");
        tables.populations.add_row(b"{}");
        let i = tables.individuals.add_row(0);
        tables.nodes.individual[0] = i;

        let mut store = tables.to_store();
        let offset_keys = store
            .iter()
            .map(|(k, _)| k.to_string())
            .filter(|k| k.ends_with("_offset"))
            .collect::<Vec<_>>();
        assert!(offset_keys.contains(&"sites/ancestral_state_offset".to_string()));
        for key in offset_keys {
            let narrow = store
                .get_offsets(&key)
                .unwrap()
                .into_iter()
                .map(|o| o as u32)
                .collect::<Vec<_>>();
            store.put_u32(&key, &narrow);
        }
        let back = TableCollection::from_store(store).unwrap();
        assert_eq!(back.nodes, tables.nodes);
        assert_eq!(back.sites, tables.sites);
        assert_eq!(back.mutations, tables.mutations);
        assert_eq!(back.individuals, tables.individuals);
        assert_eq!(back.populations, tables.populations);
    }

    #[test]
    fn test_sort_keeps_order_of_unknown_times() {
        let mut tables = two_trees();
        let s1 = tables.sites.add_row(15.0, b"0");
        let s0 = tables.sites.add_row(5.0, b"0");
        tables.mutations.add_row(s1, 5, NULL, 1.7, b"1", &[]);
        // node 0 is below node 4, yet listed first
        tables.mutations.add_row(s0, 0, NULL, unknown_time(), b"1", &[]);
        tables.mutations.add_row(s0, 4, NULL, unknown_time(), b"2", &[]);
        tables.mutations.add_row(s0, 6, NULL, 2.5, b"3", &[]);
        tables.sort();
        assert_eq!(tables.sites.position, vec![5.0, 15.0]);
        assert_eq!(tables.mutations.site, vec![0, 0, 0, 1]);
        assert_eq!(tables.mutations.node, vec![0, 4, 6, 5]);
        assert_eq!(tables.mutations.derived_state.row(0), b"1");

        // with every time known, older mutations come first
        let mut tables = two_trees();
        let s = tables.sites.add_row(5.0, b"0");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"1", &[]);
        tables.mutations.add_row(s, 4, NULL, 2.0, b"2", &[]);
        tables.sort();
        assert_eq!(tables.mutations.node, vec![4, 0]);
    }

    #[test]
    fn test_ragged_validation() {
        assert!(Ragged::from_parts("x", vec![1_u8, 2], vec![0, 1, 2], 2).is_ok());
        assert!(Ragged::from_parts("x", vec![1_u8, 2], vec![0, 1], 2).is_err());
        assert!(Ragged::from_parts("x", vec![1_u8, 2], vec![0, 2, 1], 2).is_err());
        assert!(Ragged::from_parts("x", vec![1_u8, 2], vec![0, 1, 3], 2).is_err());
    }

    #[test]
    fn test_unknown_time() {
        assert!(is_unknown_time(unknown_time()));
        assert!(!is_unknown_time(1.0));
    }
}
