//! Bits of SLiM's tree-sequence conventions needed to extend
//! a SLiM output with new mutations.

use serde_json::Value;

use crate::error::Result;
use crate::tables::{TableCollection, NULL};

/// Size of one encoded [`MutationRecord`].
pub const MUTATION_RECORD_SIZE: usize = 17;

/// The per-mutation metadata SLiM stores. Stacked mutations
/// carry one record per stacked id.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MutationRecord {
    pub mutation_type: i32,
    pub selection_coeff: f32,
    pub subpopulation: i32,
    pub origin_tick: i32,
    pub nucleotide: i8,
}

impl MutationRecord {
    pub fn neutral(mutation_type: i32, origin_tick: i32) -> Self {
        Self {
            mutation_type,
            selection_coeff: 0.0,
            subpopulation: NULL,
            origin_tick,
            nucleotide: -1,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.mutation_type.to_le_bytes());
        out.extend_from_slice(&self.selection_coeff.to_le_bytes());
        out.extend_from_slice(&self.subpopulation.to_le_bytes());
        out.extend_from_slice(&self.origin_tick.to_le_bytes());
        out.extend_from_slice(&self.nucleotide.to_le_bytes());
    }
}

/// The SLiM tick the file was written at, if recorded in the
/// top-level JSON metadata. Older files call it "generation".
pub fn slim_tick(tables: &TableCollection) -> Result<Option<i64>> {
    let metadata = tables.metadata();
    if metadata.first() != Some(&b'{') {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(&metadata)?;
    let slim = &value["SLiM"];
    Ok(slim["tick"].as_i64().or_else(|| slim["generation"].as_i64()))
}

/// Ids stacked in a SLiM derived state, e.g. `"12,40"`.
pub fn stacked_ids(state: &[u8]) -> impl Iterator<Item = i64> + '_ {
    state
        .split(|b| *b == b',')
        .filter_map(|id| std::str::from_utf8(id).ok()?.parse::<i64>().ok())
}

/// Largest SLiM mutation id in use.
pub fn max_mutation_id(tables: &TableCollection) -> Option<i64> {
    (0..tables.mutations.num_rows())
        .flat_map(|m| stacked_ids(tables.mutations.derived_state.row(m)))
        .max()
}

/// Derived state for a new id stacked on top of `parent_state`.
pub fn stack_state(parent_state: &[u8], id: i64) -> Vec<u8> {
    let mut rv = parent_state.to_vec();
    if !rv.is_empty() {
        rv.push(b',');
    }
    rv.extend_from_slice(id.to_string().as_bytes());
    rv
}

/// Metadata for a new mutation stacked on a parent with `parent_metadata`.
pub fn stack_metadata(parent_metadata: &[u8], record: MutationRecord) -> Vec<u8> {
    let mut rv = if parent_metadata.len() % MUTATION_RECORD_SIZE == 0 {
        parent_metadata.to_vec()
    } else {
        vec![]
    };
    record.encode(&mut rv);
    rv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::test_fixtures::two_trees;

    #[test]
    fn test_tick() {
        let mut tables = two_trees();
        assert_eq!(slim_tick(&tables).unwrap(), None);
        tables.set_metadata(br#"{"SLiM": {"tick": 5000, "model_type": "WF"}}"#);
        assert_eq!(slim_tick(&tables).unwrap(), Some(5000));
        tables.set_metadata(br#"{"SLiM": {"generation": 12}}"#);
        assert_eq!(slim_tick(&tables).unwrap(), Some(12));
        tables.set_metadata(b"{not json");
        assert!(slim_tick(&tables).is_err());
        tables.set_metadata(&[0, 1, 2]);
        assert_eq!(slim_tick(&tables).unwrap(), None);
    }

    #[test]
    fn test_ids() {
        let mut tables = two_trees();
        assert_eq!(max_mutation_id(&tables), None);
        let s = tables.sites.add_row(1.0, b"");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"3,17", &[]);
        tables.mutations.add_row(s, 1, NULL, 0.5, b"9", &[]);
        assert_eq!(max_mutation_id(&tables), Some(17));
        assert_eq!(stacked_ids(b"1,x,2").collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_stacking() {
        assert_eq!(stack_state(b"", 4), b"4".to_vec());
        assert_eq!(stack_state(b"1,2", 4), b"1,2,4".to_vec());

        let record = MutationRecord::neutral(2, 100);
        let one = stack_metadata(&[], record);
        assert_eq!(one.len(), MUTATION_RECORD_SIZE);
        assert_eq!(&one[0..4], &2_i32.to_le_bytes());
        assert_eq!(&one[12..16], &100_i32.to_le_bytes());
        assert_eq!(one[16], 0xff);
        let two = stack_metadata(&one, record);
        assert_eq!(two.len(), 2 * MUTATION_RECORD_SIZE);
        assert_eq!(stack_metadata(b"odd", record).len(), MUTATION_RECORD_SIZE);
    }
}
