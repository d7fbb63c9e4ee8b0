use std::collections::HashSet;

use tracing::info;

use crate::tables::TableCollection;

/// Sites whose ancestral and derived states make up more than two
/// distinct alleles.
pub fn multiallelic_sites(tables: &TableCollection) -> Vec<i32> {
    let mut alleles: Vec<HashSet<&[u8]>> = (0..tables.sites.num_rows())
        .map(|s| HashSet::from([tables.sites.ancestral_state.row(s)]))
        .collect();
    for m in 0..tables.mutations.num_rows() {
        let site = tables.mutations.site[m] as usize;
        alleles[site].insert(tables.mutations.derived_state.row(m));
    }
    (0..alleles.len())
        .filter(|&s| alleles[s].len() > 2)
        .map(|s| s as i32)
        .collect()
}

/// Drop every multiallelic site together with its mutations.
/// Returns the number of sites dropped.
pub fn keep_biallelic_only(tables: &mut TableCollection) -> usize {
    let drop = multiallelic_sites(tables);
    if !drop.is_empty() {
        tables.delete_sites(&drop);
    }
    info!(
        dropped = drop.len(),
        remaining = tables.sites.num_rows(),
        "biallelic filter"
    );
    drop.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::test_fixtures::two_trees;
    use crate::tables::NULL;

    #[test]
    fn test_keep_biallelic_only() {
        let mut tables = two_trees();
        // biallelic, recurrent
        let s = tables.sites.add_row(2.0, b"A");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"T", &[]);
        tables.mutations.add_row(s, 1, NULL, 0.5, b"T", &[]);
        // triallelic
        let s = tables.sites.add_row(5.0, b"A");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"C", &[]);
        tables.mutations.add_row(s, 2, NULL, 0.5, b"G", &[]);
        // back mutation only
        let s = tables.sites.add_row(12.0, b"0");
        tables.mutations.add_row(s, 5, NULL, 2.0, b"1", &[]);
        tables.mutations.add_row(s, 0, 4, 0.5, b"0", &[]);

        assert_eq!(multiallelic_sites(&tables), vec![1]);
        assert_eq!(keep_biallelic_only(&mut tables), 1);
        assert_eq!(tables.sites.position, vec![2.0, 12.0]);
        assert_eq!(tables.mutations.num_rows(), 4);
        assert_eq!(tables.mutations.site, vec![0, 0, 1, 1]);
        assert_eq!(tables.mutations.parent, vec![NULL, NULL, NULL, 2]);
        tables.check_integrity().unwrap();
    }

    #[test]
    fn test_nothing_to_drop() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(2.0, b"");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"7", &[]);
        let before = tables.clone();
        assert_eq!(keep_biallelic_only(&mut tables), 0);
        assert_eq!(tables, before);
    }
}
