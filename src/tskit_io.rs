//! `.trees` files and tree iteration through the tskit C library.
//!
//! tskit decodes and encodes the tables it knows about. Keys outside
//! them (top-level metadata, schemas, provenances, migrations) are
//! read from and written back to the kastore container directly, the
//! same way the built-in codec carries them.

use std::path::Path;

use tskit::metadata::{
    EdgeMetadata, IndividualMetadata, MetadataError, MetadataRoundtrip, MutationMetadata,
    NodeMetadata, PopulationMetadata, SiteMetadata,
};
use tskit::prelude::StreamingIterator;
use tracing::debug;

use crate::error::{Error, Result};
use crate::kastore::Store;
use crate::tables::{Ragged, TableCollection};

/// Row metadata passed through as raw bytes.
#[derive(Clone, Debug, Default)]
struct RawMetadata(Vec<u8>);

impl MetadataRoundtrip for RawMetadata {
    fn encode(&self) -> std::result::Result<Vec<u8>, MetadataError> {
        Ok(self.0.clone())
    }

    fn decode(md: &[u8]) -> std::result::Result<Self, MetadataError>
    where
        Self: Sized,
    {
        Ok(Self(md.to_vec()))
    }
}

impl NodeMetadata for RawMetadata {}
impl EdgeMetadata for RawMetadata {}
impl SiteMetadata for RawMetadata {}
impl MutationMetadata for RawMetadata {}
impl IndividualMetadata for RawMetadata {}
impl PopulationMetadata for RawMetadata {}

fn raw(md: Option<std::result::Result<RawMetadata, tskit::TskitError>>) -> Result<Vec<u8>> {
    Ok(md.transpose()?.map(|m| m.0).unwrap_or_default())
}

fn ragged<I: IntoIterator<Item = Result<Vec<u8>>>>(rows: I) -> Result<Ragged<u8>> {
    let mut rv = Ragged::default();
    for row in rows {
        rv.push(&row?);
    }
    Ok(rv)
}

fn num_rows(n: tskit::SizeType) -> usize {
    u64::from(n) as usize
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::tables(format!("{} is not a valid UTF-8 path", path.display())))
}

/// Copy tskit's tables into a [`TableCollection`]. Nothing outside
/// the node, edge, site, mutation, individual and population tables
/// is copied.
pub fn from_tskit(tables: &tskit::TableCollection) -> Result<TableCollection> {
    let mut rv = TableCollection::new(f64::from(tables.sequence_length()))?;

    let nodes = tables.nodes();
    rv.nodes.flags = nodes.flags_slice_raw().to_vec();
    rv.nodes.time = nodes.time_slice_raw().to_vec();
    rv.nodes.population = nodes.population_slice_raw().to_vec();
    rv.nodes.individual = nodes.individual_slice_raw().to_vec();
    rv.nodes.metadata = ragged(
        (0..num_rows(nodes.num_rows()))
            .map(|n| raw(nodes.metadata::<RawMetadata>(tskit::NodeId::from(n as i32)))),
    )?;

    let edges = tables.edges();
    rv.edges.left = edges.left_slice_raw().to_vec();
    rv.edges.right = edges.right_slice_raw().to_vec();
    rv.edges.parent = edges.parent_slice_raw().to_vec();
    rv.edges.child = edges.child_slice_raw().to_vec();
    rv.edges.metadata = ragged(
        (0..num_rows(edges.num_rows()))
            .map(|e| raw(edges.metadata::<RawMetadata>(tskit::EdgeId::from(e as i32)))),
    )?;

    let sites = tables.sites();
    let num_sites = num_rows(sites.num_rows());
    rv.sites.position = sites.position_slice_raw().to_vec();
    rv.sites.ancestral_state = ragged((0..num_sites).map(|s| {
        let state = sites.ancestral_state(tskit::SiteId::from(s as i32));
        Ok(state.unwrap_or_default().to_vec())
    }))?;
    rv.sites.metadata = ragged(
        (0..num_sites).map(|s| raw(sites.metadata::<RawMetadata>(tskit::SiteId::from(s as i32)))),
    )?;

    let mutations = tables.mutations();
    let num_mutations = num_rows(mutations.num_rows());
    rv.mutations.site = mutations.site_slice_raw().to_vec();
    rv.mutations.node = mutations.node_slice_raw().to_vec();
    rv.mutations.parent = mutations.parent_slice_raw().to_vec();
    rv.mutations.time = mutations.time_slice_raw().to_vec();
    rv.mutations.derived_state = ragged((0..num_mutations).map(|m| {
        let state = mutations.derived_state(tskit::MutationId::from(m as i32));
        Ok(state.unwrap_or_default().to_vec())
    }))?;
    rv.mutations.metadata = ragged((0..num_mutations).map(|m| {
        raw(mutations.metadata::<RawMetadata>(tskit::MutationId::from(m as i32)))
    }))?;

    let individuals = tables.individuals();
    for i in 0..num_rows(individuals.num_rows()) {
        let id = tskit::IndividualId::from(i as i32);
        let location = individuals
            .location(id)
            .unwrap_or_default()
            .iter()
            .map(|x| f64::from(*x))
            .collect::<Vec<_>>();
        let parents = individuals
            .parents(id)
            .unwrap_or_default()
            .iter()
            .map(|p| i32::from(*p))
            .collect::<Vec<_>>();
        let table = &mut rv.individuals;
        table.flags.push(individuals.flags_slice_raw()[i]);
        table.location.push(&location);
        table.parents.push(&parents);
        table
            .metadata
            .push(&raw(individuals.metadata::<RawMetadata>(id))?);
    }

    let populations = tables.populations();
    for p in 0..num_rows(populations.num_rows()) {
        let md = raw(populations.metadata::<RawMetadata>(tskit::PopulationId::from(p as i32)))?;
        rv.populations.add_row(&md);
    }
    Ok(rv)
}

/// Build tskit tables from a [`TableCollection`], with edge indexes.
pub fn to_tskit(tables: &TableCollection) -> Result<tskit::TableCollection> {
    let mut rv = tskit::TableCollection::new(tables.sequence_length)?;
    let md = |bytes: &[u8]| RawMetadata(bytes.to_vec());

    for p in 0..tables.populations.num_rows() {
        rv.add_population_with_metadata(&md(tables.populations.metadata.row(p)))?;
    }
    let individuals = &tables.individuals;
    for i in 0..individuals.num_rows() {
        let parents = individuals
            .parents
            .row(i)
            .iter()
            .map(|p| tskit::IndividualId::from(*p))
            .collect::<Vec<_>>();
        rv.add_individual_with_metadata(
            individuals.flags[i],
            individuals.location.row(i),
            &parents[..],
            &md(individuals.metadata.row(i)),
        )?;
    }
    let nodes = &tables.nodes;
    for n in 0..nodes.num_rows() {
        rv.add_node_with_metadata(
            nodes.flags[n],
            nodes.time[n],
            nodes.population[n],
            nodes.individual[n],
            &md(nodes.metadata.row(n)),
        )?;
    }
    let edges = &tables.edges;
    for e in 0..edges.num_rows() {
        rv.add_edge_with_metadata(
            edges.left[e],
            edges.right[e],
            edges.parent[e],
            edges.child[e],
            &md(edges.metadata.row(e)),
        )?;
    }
    let sites = &tables.sites;
    for s in 0..sites.num_rows() {
        rv.add_site_with_metadata(
            sites.position[s],
            Some(sites.ancestral_state.row(s)),
            &md(sites.metadata.row(s)),
        )?;
    }
    let mutations = &tables.mutations;
    for m in 0..mutations.num_rows() {
        rv.add_mutation_with_metadata(
            mutations.site[m],
            mutations.node[m],
            mutations.parent[m],
            mutations.time[m],
            Some(mutations.derived_state.row(m)),
            &md(mutations.metadata.row(m)),
        )?;
    }
    rv.build_index()?;
    Ok(rv)
}

/// Load with tskit, carrying the keys tskit does not model.
pub fn load(path: &Path) -> Result<TableCollection> {
    let tables = tskit::TableCollection::new_from_file(path_str(path)?)?;
    let mut rv = from_tskit(&tables)?;
    rv.carry_through(Store::load(path)?);
    rv.check_integrity()?;
    debug!(path = %path.display(), "loaded with tskit");
    Ok(rv)
}

/// Dump with tskit, then write the carried keys back into the file.
/// The file keeps the uuid tskit gave it.
pub fn dump(tables: &TableCollection, path: &Path) -> Result<()> {
    let ts = to_tskit(tables)?.tree_sequence(tskit::TreeSequenceFlags::BUILD_INDEXES)?;
    ts.dump(path_str(path)?, tskit::TableOutputOptions::default())?;

    let mut written = Store::load(path)?;
    for (key, item) in tables.passthrough().iter() {
        if key != "uuid" {
            written.insert(key, item.clone());
        }
    }
    written.dump(path)
}

/// One tree as tskit sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeParents {
    pub left: f64,
    pub right: f64,
    /// Parent of every node, `-1` for none
    pub parent: Vec<i32>,
    pub num_roots: usize,
}

/// Every tree of `tables`, left to right, iterated by tskit.
pub fn trees(tables: &TableCollection) -> Result<Vec<TreeParents>> {
    let num_nodes = tables.nodes.num_rows();
    let ts = to_tskit(tables)?.tree_sequence(tskit::TreeSequenceFlags::BUILD_INDEXES)?;
    let mut iter = ts.tree_iterator(tskit::TreeFlags::default())?;
    let mut rv = vec![];
    while let Some(tree) = iter.next() {
        let (left, right) = tree.interval();
        rv.push(TreeParents {
            left: f64::from(left),
            right: f64::from(right),
            parent: tree
                .parent_array()
                .iter()
                .take(num_nodes)
                .map(|p| i32::from(*p))
                .collect(),
            num_roots: tree.roots().count(),
        });
    }
    Ok(rv)
}
