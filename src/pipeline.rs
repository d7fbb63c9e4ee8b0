use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use rand::SeedableRng;
use tracing::{debug, info};

use crate::cli::Args;
use crate::error::{Error, Result};
use crate::filter::keep_biallelic_only;
use crate::intervals::read_intervals;
use crate::mutate::sim_mutations;
use crate::ratemap::make_rate_map;
use crate::recapitate::recapitate;
use crate::tables::TableCollection;
use crate::vcf::write_vcf;

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Read the intervals, load, optionally recapitate, mutate, optionally
/// filter, and write the VCF (and the final tree sequence if requested).
/// The interval files are read before the tree sequence is loaded.
pub fn run(args: &Args) -> Result<()> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(args.seed);

    let genes = read_intervals(&args.gene_csv)?;
    let intergenes = read_intervals(&args.intergene_csv)?;
    debug!(
        genes = genes.len(),
        intergenes = intergenes.len(),
        "read intervals"
    );
    let rate_map = make_rate_map(
        args.sequence_length,
        &genes,
        &intergenes,
        args.gene_neutral_rate(),
        args.intergene_neutral_rate(),
    )?;
    info!(
        intervals = rate_map.num_intervals(),
        gene_rate = args.gene_neutral_rate(),
        intergene_rate = args.intergene_neutral_rate(),
        total_mass = rate_map.total_mass(),
        "built neutral rate map"
    );

    let mut tables = TableCollection::load(&args.trees)?;
    info!(
        path = %args.trees.display(),
        nodes = tables.nodes.num_rows(),
        edges = tables.edges.num_rows(),
        sites = tables.sites.num_rows(),
        mutations = tables.mutations.num_rows(),
        "loaded tree sequence"
    );
    if tables.sequence_length != args.sequence_length as f64 {
        return Err(Error::parameter(format!(
            "--L {} does not match the tree sequence length {}",
            args.sequence_length, tables.sequence_length
        )));
    }

    if args.recapitate {
        tables = recapitate(&tables, args.recap_params(), &mut rng)?;
    }

    tables = sim_mutations(&tables, &rate_map, args.mutation_params(), &mut rng)?;

    if args.biallelic_only {
        keep_biallelic_only(&mut tables);
    }

    create_parent_dir(&args.out_vcf)?;
    let out = BufWriter::new(File::create(&args.out_vcf)?);
    let rows = write_vcf(&tables, &args.vcf_options(), out)?;
    info!(path = %args.out_vcf.display(), rows, "wrote VCF");

    if let Some(path) = &args.out_trees {
        create_parent_dir(path)?;
        tables.dump(path)?;
        info!(path = %path.display(), "wrote tree sequence");
    }

    println!("wrote {}", args.out_vcf.display());
    Ok(())
}
