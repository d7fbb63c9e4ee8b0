use std::path::PathBuf;

use clap::Parser;

use crate::error::{Error, Result};
use crate::mutate::{ModelKind, MutationParams};
use crate::recapitate::RecapParams;
use crate::vcf::VcfOptions;

/// Overlay neutral mutations on a tree sequence and write a VCF.
#[derive(Parser, Debug, Clone)]
#[command(name = "trees2vcf", version)]
pub struct Args {
    /// Input .trees file
    #[arg(long)]
    pub trees: PathBuf,
    /// Output VCF
    #[arg(long = "out_vcf")]
    pub out_vcf: PathBuf,
    /// Headerless CSV of inclusive gene intervals
    #[arg(long = "gene_csv")]
    pub gene_csv: PathBuf,
    /// Headerless CSV of inclusive intergene intervals
    #[arg(long = "intergene_csv")]
    pub intergene_csv: PathBuf,
    /// Sequence length; must match the tree sequence
    #[arg(long = "L")]
    pub sequence_length: i64,
    #[arg(long)]
    pub recapitate: bool,
    /// Diploid population size for recapitation
    #[arg(long = "Ne", default_value_t = 1135.0)]
    pub ne: f64,
    /// Recombination rate per base per generation
    #[arg(long = "recomb", default_value_t = 1.2e-5)]
    pub recombination_rate: f64,
    /// Genic mutation rate
    #[arg(long = "gmu")]
    pub gene_mutation_rate: f64,
    /// Intergenic mutation rate
    #[arg(long = "imu")]
    pub intergene_mutation_rate: f64,
    /// Fraction of genic mutations that are deleterious
    #[arg(long = "gd")]
    pub gene_deleterious_fraction: f64,
    /// Fraction of intergenic mutations that are deleterious
    #[arg(long = "id")]
    pub intergene_deleterious_fraction: f64,
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    /// Drop sites with more than two alleles
    #[arg(long = "biallelic_only")]
    pub biallelic_only: bool,
    #[arg(long, value_enum, default_value_t = ModelKind::Slim)]
    pub model: ModelKind,
    /// SLiM mutation type id given to new mutations
    #[arg(long = "slim_mutation_type", default_value_t = 0)]
    pub slim_mutation_type: i32,
    /// Samples per VCF column when nodes have no individuals
    #[arg(long, default_value_t = 2)]
    pub ploidy: u32,
    /// VCF CHROM value
    #[arg(long, default_value = "1")]
    pub contig: String,
    #[arg(long = "allow_position_zero")]
    pub allow_position_zero: bool,
    /// Also write the final tree sequence here
    #[arg(long = "out_trees")]
    pub out_trees: Option<PathBuf>,
    #[arg(short, long)]
    pub verbose: bool,
}

fn check_rate(name: &str, rate: f64) -> Result<()> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(Error::parameter(format!(
            "{name} must be finite and >= 0, got {rate}"
        )));
    }
    Ok(())
}

fn check_fraction(name: &str, fraction: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(Error::parameter(format!(
            "{name} must lie in [0, 1], got {fraction}"
        )));
    }
    Ok(())
}

impl Args {
    pub fn validate(self) -> Result<Self> {
        if self.sequence_length <= 0 {
            return Err(Error::parameter(format!(
                "L must be positive, got {}",
                self.sequence_length
            )));
        }
        check_rate("gmu", self.gene_mutation_rate)?;
        check_rate("imu", self.intergene_mutation_rate)?;
        check_fraction("gd", self.gene_deleterious_fraction)?;
        check_fraction("id", self.intergene_deleterious_fraction)?;
        if self.recapitate {
            self.recap_params().validate()?;
        }
        if self.ploidy == 0 {
            return Err(Error::parameter("ploidy must be at least 1"));
        }
        if self.contig.is_empty() || self.contig.contains(char::is_whitespace) {
            return Err(Error::parameter(format!(
                "contig {:?} is not a valid VCF CHROM",
                self.contig
            )));
        }
        Ok(self)
    }

    /// Rate of neutral mutations inside genes.
    pub fn gene_neutral_rate(&self) -> f64 {
        self.gene_mutation_rate * (1.0 - self.gene_deleterious_fraction)
    }

    /// Rate of neutral mutations between genes.
    pub fn intergene_neutral_rate(&self) -> f64 {
        self.intergene_mutation_rate * (1.0 - self.intergene_deleterious_fraction)
    }

    pub fn recap_params(&self) -> RecapParams {
        RecapParams {
            ne: self.ne,
            recombination_rate: self.recombination_rate,
        }
    }

    pub fn mutation_params(&self) -> MutationParams {
        MutationParams {
            model: self.model,
            slim_mutation_type: self.slim_mutation_type,
        }
    }

    pub fn vcf_options(&self) -> VcfOptions {
        VcfOptions {
            contig: self.contig.clone(),
            ploidy: self.ploidy,
            allow_position_zero: self.allow_position_zero,
        }
    }
}
