//! Neutral mutations overlaid on a tree sequence.
//!
//! Mutations fall on edges as a Poisson process whose intensity
//! is the rate map times branch length. The genome is discrete:
//! positions are whole bases, and a position hit more than once
//! becomes a single site carrying several mutations. Existing
//! sites and mutations are kept.

use std::collections::HashMap;

use clap::ValueEnum;
use rand::prelude::Rng;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ratemap::RateMap;
use crate::slim;
use crate::tables::{is_unknown_time, Ragged, TableCollection, NULL};
use crate::trees::TreeSweep;

const NUCLEOTIDES: [&[u8]; 4] = [b"A", b"C", b"G", b"T"];

/// How derived states of new mutations are chosen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModelKind {
    /// SLiM mutation ids, stacked on the inherited state
    Slim,
    /// Alleles 0 and 1; each mutation flips the state
    Binary,
    /// Nucleotides; each mutation moves to one of the other three bases
    Jc69,
}

#[derive(Copy, Clone, Debug)]
pub struct MutationParams {
    pub model: ModelKind,
    /// Mutation type id recorded in SLiM metadata
    pub slim_mutation_type: i32,
}

enum Alleles {
    Slim {
        mutation_type: i32,
        next_id: i64,
        tick: i64,
    },
    Binary,
    Jc69,
}

impl Alleles {
    fn new(params: MutationParams, tables: &TableCollection) -> Result<Self> {
        let rv = match params.model {
            ModelKind::Slim => Alleles::Slim {
                mutation_type: params.slim_mutation_type,
                next_id: slim::max_mutation_id(tables).map_or(0, |id| id + 1),
                tick: slim::slim_tick(tables)?.unwrap_or(1),
            },
            ModelKind::Binary => Alleles::Binary,
            ModelKind::Jc69 => Alleles::Jc69,
        };
        Ok(rv)
    }

    fn name(&self) -> &'static str {
        match self {
            Alleles::Slim { .. } => "slim",
            Alleles::Binary => "binary",
            Alleles::Jc69 => "jc69",
        }
    }

    fn ancestral_state<R: Rng>(&self, rng: &mut R) -> Vec<u8> {
        match self {
            Alleles::Slim { .. } => vec![],
            Alleles::Binary => b"0".to_vec(),
            Alleles::Jc69 => NUCLEOTIDES[rng.gen_range(0..4)].to_vec(),
        }
    }

    /// `(derived_state, metadata)` of a new mutation whose
    /// parent carries `state` / `metadata`.
    fn mutate<R: Rng>(
        &mut self,
        state: &[u8],
        metadata: &[u8],
        time: f64,
        position: f64,
        rng: &mut R,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let unknown = |model: &'static str| Error::UnknownAllele {
            allele: String::from_utf8_lossy(state).into_owned(),
            position,
            model,
        };
        match self {
            Alleles::Slim {
                mutation_type,
                next_id,
                tick,
            } => {
                let id = *next_id;
                *next_id += 1;
                let origin_tick = (*tick - time.floor() as i64) as i32;
                let record = slim::MutationRecord::neutral(*mutation_type, origin_tick);
                Ok((
                    slim::stack_state(state, id),
                    slim::stack_metadata(metadata, record),
                ))
            }
            Alleles::Binary => match state {
                b"0" => Ok((b"1".to_vec(), vec![])),
                b"1" => Ok((b"0".to_vec(), vec![])),
                _ => Err(unknown("binary")),
            },
            Alleles::Jc69 => {
                let current = NUCLEOTIDES
                    .iter()
                    .position(|n| *n == state)
                    .ok_or_else(|| unknown("jc69"))?;
                // one of the other three, uniformly
                let pick = (current + rng.gen_range(1..4)) % 4;
                Ok((NUCLEOTIDES[pick].to_vec(), vec![]))
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct NewMutation {
    position: f64,
    node: i32,
    time: f64,
}

/// Poisson numbers of mutations per (edge, rate interval) pair.
fn place_mutations<R: Rng>(
    tables: &TableCollection,
    rate_map: &RateMap,
    rng: &mut R,
) -> Vec<NewMutation> {
    let mut rv = vec![];
    let breaks = rate_map.position();
    let rates = rate_map.rate();
    let edges = &tables.edges;
    let time = &tables.nodes.time;

    for e in 0..edges.num_rows() {
        let (left, right) = (edges.left[e], edges.right[e]);
        let child_time = time[edges.child[e] as usize];
        let parent_time = time[edges.parent[e] as usize];
        let branch_length = parent_time - child_time;
        let first = breaks.partition_point(|b| *b <= left).saturating_sub(1);
        for i in first..rates.len() {
            if breaks[i] >= right {
                break;
            }
            // whole bases only
            let l = left.max(breaks[i]).ceil();
            let r = right.min(breaks[i + 1]).ceil();
            let mean = rates[i] * (r - l) * branch_length;
            if mean <= 0.0 || r <= l {
                continue;
            }
            let num_mutations = match rand_distr::Poisson::<f64>::new(mean) {
                Ok(p) => rng.sample(p) as u64,
                Err(_) => continue,
            };
            let position_generator = rand::distributions::Uniform::new(l, r);
            let time_generator = rand::distributions::Uniform::new(child_time, parent_time);
            for _ in 0..num_mutations {
                let position = rng.sample(position_generator).floor();
                let mutation_time = rng.sample(time_generator);
                rv.push(NewMutation {
                    position,
                    node: edges.child[e],
                    time: mutation_time,
                });
            }
        }
    }
    rv
}

struct StateUpdate {
    mutation: usize,
    parent: i32,
    derived: Option<(Vec<u8>, Vec<u8>)>,
}

/// Walk the trees, and at each touched site order its mutations
/// oldest first, find each one's parent mutation, and draw states
/// for the new ones.
fn assign_states<R: Rng>(
    tables: &TableCollection,
    is_new: &[bool],
    touched_sites: &[usize],
    alleles: &mut Alleles,
    rng: &mut R,
) -> Result<Vec<StateUpdate>> {
    let mutations = &tables.mutations;
    let mut by_site: Vec<Vec<usize>> = vec![vec![]; tables.sites.num_rows()];
    for m in 0..mutations.num_rows() {
        by_site[mutations.site[m] as usize].push(m);
    }

    let mut rv = vec![];
    let mut sweep = TreeSweep::new(tables);
    sweep.advance();
    for &site in touched_sites {
        let position = tables.sites.position[site];
        while sweep.interval().1 <= position {
            if !sweep.advance() {
                return Err(Error::tables(format!(
                    "site position {position} is past the end of the sequence"
                )));
            }
        }

        let mut order = by_site[site].clone();
        if let Some(&m) = order.iter().find(|&&m| is_unknown_time(mutations.time[m])) {
            return Err(Error::tables(format!(
                "mutation {m} at position {position} has an unknown time"
            )));
        }
        order.sort_by(|&i, &j| mutations.time[j].total_cmp(&mutations.time[i]).then(i.cmp(&j)));

        // (state, metadata) of each mutation processed so far
        let mut states: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(order.len());
        for (k, &m) in order.iter().enumerate() {
            let node = mutations.node[m];
            let above = (0..k)
                .rev()
                .find(|&j| sweep.is_descendant(node, mutations.node[order[j]]));
            let (parent, inherited_state, inherited_metadata) = match above {
                Some(j) => (order[j] as i32, states[j].0.clone(), states[j].1.clone()),
                None => (NULL, tables.sites.ancestral_state.row(site).to_vec(), vec![]),
            };
            if is_new[m] {
                let (state, metadata) = alleles.mutate(
                    &inherited_state,
                    &inherited_metadata,
                    mutations.time[m],
                    position,
                    rng,
                )?;
                states.push((state.clone(), metadata.clone()));
                rv.push(StateUpdate {
                    mutation: m,
                    parent,
                    derived: Some((state, metadata)),
                });
            } else {
                states.push((
                    mutations.derived_state.row(m).to_vec(),
                    mutations.metadata.row(m).to_vec(),
                ));
                rv.push(StateUpdate {
                    mutation: m,
                    parent,
                    derived: None,
                });
            }
        }
    }
    Ok(rv)
}

/// Add neutral mutations along `rate_map`, keeping existing ones.
/// The result is sorted.
pub fn sim_mutations<R: Rng>(
    tables: &TableCollection,
    rate_map: &RateMap,
    params: MutationParams,
    rng: &mut R,
) -> Result<TableCollection> {
    if rate_map.sequence_length() != tables.sequence_length {
        return Err(Error::RateMap {
            message: format!(
                "rate map length {} does not match the sequence length {}",
                rate_map.sequence_length(),
                tables.sequence_length
            ),
        });
    }
    let mut alleles = Alleles::new(params, tables)?;
    let placed = place_mutations(tables, rate_map, rng);
    debug!(
        num_new = placed.len(),
        model = alleles.name(),
        "placed new mutations"
    );

    let mut rv = tables.clone();
    let mut site_at: HashMap<u64, i32> = (0..rv.sites.num_rows())
        .map(|s| (rv.sites.position[s].to_bits(), s as i32))
        .collect();
    let num_existing_sites = rv.sites.num_rows();
    let mut is_new = vec![false; rv.mutations.num_rows()];
    let mut touched = vec![false; num_existing_sites];
    for m in &placed {
        let site = match site_at.get(&m.position.to_bits()) {
            Some(&s) => s,
            None => {
                let ancestral_state = alleles.ancestral_state(rng);
                let s = rv.sites.add_row(m.position, &ancestral_state);
                site_at.insert(m.position.to_bits(), s);
                touched.push(false);
                s
            }
        };
        touched[site as usize] = true;
        // derived state and parent are filled in below
        rv.mutations.add_row(site, m.node, NULL, m.time, &[], &[]);
        is_new.push(true);
    }

    let mut touched_sites = (0..touched.len())
        .filter(|&s| touched[s])
        .collect::<Vec<_>>();
    touched_sites.sort_by(|&i, &j| rv.sites.position[i].total_cmp(&rv.sites.position[j]));

    let updates = assign_states(&rv, &is_new, &touched_sites, &mut alleles, rng)?;

    let mut derived: Vec<Option<(Vec<u8>, Vec<u8>)>> = vec![None; rv.mutations.num_rows()];
    for update in updates {
        rv.mutations.parent[update.mutation] = update.parent;
        derived[update.mutation] = update.derived;
    }
    let mut derived_state = Ragged::default();
    let mut metadata = Ragged::default();
    for (m, d) in derived.iter().enumerate() {
        match d {
            Some((state, md)) => {
                derived_state.push(state);
                metadata.push(md);
            }
            None => {
                derived_state.push(rv.mutations.derived_state.row(m));
                metadata.push(rv.mutations.metadata.row(m));
            }
        }
    }
    rv.mutations.derived_state = derived_state;
    rv.mutations.metadata = metadata;

    rv.sort();
    rv.check_integrity()?;
    info!(
        new_mutations = placed.len(),
        new_sites = rv.sites.num_rows() - num_existing_sites,
        total_sites = rv.sites.num_rows(),
        "mutations added"
    );
    Ok(rv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::test_fixtures::two_trees;
    use rand::SeedableRng;

    fn params(model: ModelKind) -> MutationParams {
        MutationParams {
            model,
            slim_mutation_type: 0,
        }
    }

    fn rng(seed: u64) -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(seed)
    }

    #[test]
    fn test_zero_rate_adds_nothing() {
        let tables = two_trees();
        let map = RateMap::uniform(20.0, 0.0).unwrap();
        let rv = sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(1)).unwrap();
        assert_eq!(rv, tables);
    }

    #[test]
    fn test_length_mismatch() {
        let tables = two_trees();
        let map = RateMap::uniform(30.0, 1.0).unwrap();
        assert!(matches!(
            sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(1)),
            Err(Error::RateMap { .. })
        ));
    }

    #[test]
    fn test_mutations_only_where_rate_is_positive() {
        let tables = two_trees();
        let map = RateMap::new(vec![0., 5., 8., 20.], vec![0., 2.0, 0.]).unwrap();
        let rv = sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(2)).unwrap();
        assert!(rv.sites.num_rows() > 0);
        for x in &rv.sites.position {
            assert!((5.0..8.0).contains(x), "{x}");
            assert_eq!(x.fract(), 0.0);
        }
    }

    #[test]
    fn test_binary_states_are_consistent() {
        let tables = two_trees();
        let map = RateMap::uniform(20.0, 1.0).unwrap();
        let rv = sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(3)).unwrap();
        assert!(rv.mutations.num_rows() > 0);
        for m in 0..rv.mutations.num_rows() {
            let site = rv.mutations.site[m] as usize;
            let parent = rv.mutations.parent[m];
            let inherited = if parent == NULL {
                rv.sites.ancestral_state.row(site)
            } else {
                assert!((parent as usize) < m);
                rv.mutations.derived_state.row(parent as usize)
            };
            let derived = rv.mutations.derived_state.row(m);
            assert_ne!(inherited, derived);
            assert!(derived == b"0" || derived == b"1");
        }
    }

    #[test]
    fn test_jc69() {
        let tables = two_trees();
        let map = RateMap::uniform(20.0, 1.0).unwrap();
        let rv = sim_mutations(&tables, &map, params(ModelKind::Jc69), &mut rng(4)).unwrap();
        for s in 0..rv.sites.num_rows() {
            assert!(NUCLEOTIDES.contains(&rv.sites.ancestral_state.row(s)));
        }
        for m in 0..rv.mutations.num_rows() {
            assert!(NUCLEOTIDES.contains(&rv.mutations.derived_state.row(m)));
        }
    }

    #[test]
    fn test_slim_ids_continue_after_existing() {
        let mut tables = two_trees();
        tables.set_metadata(br#"{"SLiM": {"tick": 100}}"#);
        let s = tables.sites.add_row(3.0, b"");
        let record = slim::stack_metadata(&[], slim::MutationRecord::neutral(1, 90));
        tables.mutations.add_row(s, 4, NULL, 2.0, b"41", &record);

        let map = RateMap::uniform(20.0, 0.5).unwrap();
        let rv = sim_mutations(&tables, &map, params(ModelKind::Slim), &mut rng(5)).unwrap();
        let mut ids = vec![];
        for m in 0..rv.mutations.num_rows() {
            let state = rv.mutations.derived_state.row(m);
            let stacked = slim::stacked_ids(state).collect::<Vec<_>>();
            assert!(!stacked.is_empty());
            let md = rv.mutations.metadata.row(m);
            assert_eq!(md.len(), stacked.len() * slim::MUTATION_RECORD_SIZE);
            ids.push(*stacked.last().unwrap());
        }
        ids.sort();
        let expected = std::iter::once(41)
            .chain(42..42 + (rv.mutations.num_rows() as i64 - 1))
            .collect::<Vec<_>>();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_existing_mutations_kept() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(3.0, b"0");
        tables.mutations.add_row(s, 4, NULL, 2.0, b"1", &[]);
        let map = RateMap::uniform(20.0, 0.3).unwrap();
        let rv = sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(6)).unwrap();
        let site = rv.sites.position.iter().position(|x| *x == 3.0).unwrap();
        assert!((0..rv.mutations.num_rows()).any(|m| {
            rv.mutations.site[m] as usize == site
                && rv.mutations.node[m] == 4
                && rv.mutations.time[m] == 2.0
        }));
    }

    #[test]
    fn test_unknown_allele() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(3.0, b"");
        tables.mutations.add_row(s, 6, NULL, 3.5, b"5", &[]);
        // a mutation on every base guarantees position 3 is hit
        let map = RateMap::uniform(20.0, 50.0).unwrap();
        assert!(matches!(
            sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(7)),
            Err(Error::UnknownAllele { .. })
        ));
    }

    #[test]
    fn test_unknown_mutation_time() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(3.0, b"0");
        tables
            .mutations
            .add_row(s, 4, NULL, crate::tables::unknown_time(), b"1", &[]);
        let map = RateMap::uniform(20.0, 50.0).unwrap();
        match sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(9)) {
            Err(Error::Tables { message }) => {
                assert!(message.contains("unknown time"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }

        // untouched sites may keep unknown times
        let map = RateMap::uniform(20.0, 0.0).unwrap();
        assert!(sim_mutations(&tables, &map, params(ModelKind::Binary), &mut rng(9)).is_ok());
    }

    #[test]
    fn test_deterministic() {
        let tables = two_trees();
        let map = RateMap::uniform(20.0, 0.2).unwrap();
        let a = sim_mutations(&tables, &map, params(ModelKind::Jc69), &mut rng(8)).unwrap();
        let b = sim_mutations(&tables, &map, params(ModelKind::Jc69), &mut rng(8)).unwrap();
        assert_eq!(a, b);
    }
}
