pub mod cli;
pub mod error;
pub mod filter;
pub mod intervals;
pub mod kastore;
pub mod logging;
pub mod mutate;
pub mod pipeline;
pub mod ratemap;
pub mod recapitate;
pub mod slim;
pub mod tables;
pub mod trees;
#[cfg(feature = "tskit")]
pub mod tskit_io;
pub mod vcf;

pub use cli::Args;
pub use error::{Error, Result};
pub use ratemap::RateMap;
pub use tables::TableCollection;
