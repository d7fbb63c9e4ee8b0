//! VCF 4.2 output, one row per site.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::debug;

use crate::error::{Error, Result};
use crate::tables::{TableCollection, NULL};
use crate::trees::TreeSweep;

#[derive(Clone, Debug)]
pub struct VcfOptions {
    /// Value of the CHROM column
    pub contig: String,
    /// Samples per VCF column when nodes carry no individuals
    pub ploidy: u32,
    pub allow_position_zero: bool,
}

impl Default for VcfOptions {
    fn default() -> Self {
        Self {
            contig: "1".to_string(),
            ploidy: 2,
            allow_position_zero: false,
        }
    }
}

fn vcf_error<S: Into<String>>(message: S) -> Error {
    Error::Vcf {
        message: message.into(),
    }
}

/// Sample nodes of each VCF column, left to right.
fn sample_groups(tables: &TableCollection, ploidy: u32) -> Result<Vec<Vec<i32>>> {
    let samples = tables.samples();
    let individual = &tables.nodes.individual;
    if !samples.is_empty() && samples.iter().all(|&n| individual[n as usize] != NULL) {
        let mut by_individual: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for &n in &samples {
            by_individual
                .entry(individual[n as usize])
                .or_default()
                .push(n);
        }
        return Ok(by_individual.into_values().collect());
    }
    let ploidy = ploidy as usize;
    if ploidy == 0 || samples.len() % ploidy != 0 {
        return Err(vcf_error(format!(
            "{} samples cannot be split into groups of ploidy {}",
            samples.len(),
            ploidy
        )));
    }
    Ok(samples.chunks(ploidy).map(|c| c.to_vec()).collect())
}

fn is_nucleotide_string(allele: &[u8]) -> bool {
    !allele.is_empty()
        && allele
            .iter()
            .all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
}

fn allele_text(allele: &[u8], index: usize) -> String {
    if is_nucleotide_string(allele) {
        String::from_utf8_lossy(allele).into_owned()
    } else {
        index.to_string()
    }
}

fn write_header<W: Write>(
    out: &mut W,
    tables: &TableCollection,
    options: &VcfOptions,
    num_columns: usize,
) -> Result<()> {
    writeln!(out, "##fileformat=VCFv4.2")?;
    writeln!(out, "##source=trees2vcf {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "##FILTER=<ID=PASS,Description=\"All filters passed\">")?;
    writeln!(
        out,
        "##contig=<ID={},length={}>",
        options.contig,
        tables.sequence_length.ceil() as u64
    )?;
    writeln!(
        out,
        "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">"
    )?;
    write!(out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
    for i in 0..num_columns {
        write!(out, "\ttsk_{i}")?;
    }
    writeln!(out)?;
    Ok(())
}

/// Write `tables` as VCF. Returns the number of rows written.
pub fn write_vcf<W: Write>(
    tables: &TableCollection,
    options: &VcfOptions,
    mut out: W,
) -> Result<usize> {
    let groups = sample_groups(tables, options.ploidy)?;
    write_header(&mut out, tables, options, groups.len())?;

    // node -> position of the sample in `samples`
    let samples = groups.iter().flatten().copied().collect::<Vec<_>>();
    let mut sample_index = vec![None; tables.nodes.num_rows()];
    for (i, &n) in samples.iter().enumerate() {
        sample_index[n as usize] = Some(i);
    }

    let mut by_site: Vec<Vec<usize>> = vec![vec![]; tables.sites.num_rows()];
    for m in 0..tables.mutations.num_rows() {
        by_site[tables.mutations.site[m] as usize].push(m);
    }

    let mut genotypes = vec![0_usize; samples.len()];
    let mut mutated = vec![false; samples.len()];
    let mut last_pos = None;
    let mut sweep = TreeSweep::new(tables);
    sweep.advance();
    for site in 0..tables.sites.num_rows() {
        let position = tables.sites.position[site];
        let pos = position.round() as u64;
        if pos == 0 && !options.allow_position_zero {
            return Err(vcf_error(
                "a site at position 0 cannot be written to VCF; pass --allow_position_zero to keep it",
            ));
        }
        if last_pos.is_some_and(|last| pos <= last) {
            return Err(vcf_error(format!(
                "site {site} at position {position} does not have a VCF position greater than the previous site"
            )));
        }
        last_pos = Some(pos);
        while sweep.interval().1 <= position {
            if !sweep.advance() {
                return Err(vcf_error(format!("site {site} is past the end of the sequence")));
            }
        }

        let mut alleles: Vec<&[u8]> = vec![tables.sites.ancestral_state.row(site)];
        genotypes.iter_mut().for_each(|g| *g = 0);
        mutated.iter_mut().for_each(|m| *m = false);
        // parents precede children, so later mutations overwrite
        for &m in &by_site[site] {
            let state = tables.mutations.derived_state.row(m);
            let allele = match alleles.iter().position(|a| *a == state) {
                Some(a) => a,
                None => {
                    alleles.push(state);
                    alleles.len() - 1
                }
            };
            for u in sweep.subtree(tables.mutations.node[m]) {
                if let Some(i) = sample_index[u as usize] {
                    genotypes[i] = allele;
                    mutated[i] = true;
                }
            }
        }

        let reference = allele_text(alleles[0], 0);
        let alt = if alleles.len() > 1 {
            (1..alleles.len())
                .map(|a| allele_text(alleles[a], a))
                .collect::<Vec<_>>()
                .join(",")
        } else {
            ".".to_string()
        };
        write!(
            out,
            "{}\t{pos}\t{site}\t{reference}\t{alt}\t.\tPASS\t.\tGT",
            options.contig
        )?;
        let mut i = 0;
        for group in &groups {
            let calls = group
                .iter()
                .map(|&n| {
                    let call = if sweep.is_isolated(n) && !mutated[i] {
                        ".".to_string()
                    } else {
                        genotypes[i].to_string()
                    };
                    i += 1;
                    call
                })
                .collect::<Vec<_>>();
            write!(out, "\t{}", calls.join("|"))?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    debug!(
        rows = tables.sites.num_rows(),
        columns = groups.len(),
        "VCF written"
    );
    Ok(tables.sites.num_rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::test_fixtures::two_trees;

    fn to_string(tables: &TableCollection, options: &VcfOptions) -> Result<String> {
        let mut out = vec![];
        write_vcf(tables, options, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn body(vcf: &str) -> Vec<&str> {
        vcf.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[test]
    fn test_header() {
        let vcf = to_string(&two_trees(), &VcfOptions::default()).unwrap();
        let lines = vcf.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert!(lines[1].starts_with("##source=trees2vcf "));
        assert!(lines.contains(&"##contig=<ID=1,length=20>"));
        assert_eq!(
            lines.last().unwrap(),
            &"#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ttsk_0\ttsk_1"
        );
        assert!(body(&vcf).is_empty());
    }

    #[test]
    fn test_rows() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(5.0, b"A");
        tables.mutations.add_row(s, 4, NULL, 2.0, b"T", &[]);
        let s = tables.sites.add_row(12.0, b"");
        tables.mutations.add_row(s, 5, NULL, 2.0, b"3", &[]);
        tables.mutations.add_row(s, 3, NULL, 0.5, b"3,4", &[]);
        let s = tables.sites.add_row(15.0, b"G");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"G", &[]);

        let vcf = to_string(&tables, &VcfOptions::default()).unwrap();
        assert_eq!(
            body(&vcf),
            vec![
                "1\t5\t0\tA\tT\t.\tPASS\t.\tGT\t1|1\t0|.",
                "1\t12\t1\t0\t1,2\t.\tPASS\t.\tGT\t1|0\t1|2",
                "1\t15\t2\tG\t.\t.\tPASS\t.\tGT\t0|0\t0|.",
            ]
        );
    }

    #[test]
    fn test_ploidy() {
        let tables = two_trees();
        let options = VcfOptions {
            ploidy: 3,
            ..Default::default()
        };
        assert!(matches!(
            to_string(&tables, &options),
            Err(Error::Vcf { .. })
        ));
        let options = VcfOptions {
            ploidy: 1,
            contig: "chr2".to_string(),
            ..Default::default()
        };
        let vcf = to_string(&tables, &options).unwrap();
        assert!(vcf.contains("\ttsk_3\n"));
        assert!(vcf.contains("##contig=<ID=chr2,length=20>"));
    }

    #[test]
    fn test_individuals() {
        let mut tables = two_trees();
        tables.individuals.add_row(0);
        tables.individuals.add_row(0);
        tables.nodes.individual[0] = 1;
        tables.nodes.individual[2] = 1;
        tables.nodes.individual[1] = 0;
        tables.nodes.individual[3] = 0;
        let s = tables.sites.add_row(5.0, b"A");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"C", &[]);
        let vcf = to_string(&tables, &VcfOptions::default()).unwrap();
        // columns: individual 0 = nodes (1, 3), individual 1 = nodes (0, 2)
        assert_eq!(body(&vcf), vec!["1\t5\t0\tA\tC\t.\tPASS\t.\tGT\t0|.\t1|0"]);
    }

    #[test]
    fn test_position_zero() {
        let mut tables = two_trees();
        let s = tables.sites.add_row(0.0, b"A");
        tables.mutations.add_row(s, 0, NULL, 0.5, b"C", &[]);
        assert!(to_string(&tables, &VcfOptions::default()).is_err());
        let options = VcfOptions {
            allow_position_zero: true,
            ..Default::default()
        };
        let vcf = to_string(&tables, &options).unwrap();
        assert_eq!(body(&vcf)[0], "1\t0\t0\tA\tC\t.\tPASS\t.\tGT\t1|0\t0|.");
    }
}
