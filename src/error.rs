use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{path}, line {line}: {message}")]
    Interval {
        path: String,
        line: u64,
        message: String,
    },

    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("invalid rate map: {message}")]
    RateMap { message: String },

    #[error("kastore format error: {message}")]
    Kastore { message: String },

    #[error("bad tree sequence: {message}")]
    Tables { message: String },

    #[error("allele {allele:?} at position {position} is not part of the {model} model")]
    UnknownAllele {
        allele: String,
        position: f64,
        model: &'static str,
    },

    #[error("VCF error: {message}")]
    Vcf { message: String },

    #[cfg(feature = "tskit")]
    #[error("tskit error: {0}")]
    Tskit(#[from] tskit::TskitError),
}

impl Error {
    pub(crate) fn parameter<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub(crate) fn kastore<S: Into<String>>(message: S) -> Self {
        Self::Kastore {
            message: message.into(),
        }
    }

    pub(crate) fn tables<S: Into<String>>(message: S) -> Self {
        Self::Tables {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
