use clap::Parser;

use trees2vcf::logging::init_cli_logger;
use trees2vcf::{pipeline, Args};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_cli_logger(args.verbose);
    tracing::debug!("{:?}", args);

    let args = args.validate()?;
    pipeline::run(&args)?;
    Ok(())
}
