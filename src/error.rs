use std::path::PathBuf;
use thiserror::Error;

pub type ConvertResult<T> = std::result::Result<T, ConvertError>;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("descriptor {path}: {reason}")]
    DescriptorLoad { path: PathBuf, reason: String },

    #[error("reader for descriptor '{descriptor}' failed: {reason}")]
    ParseInvocation { descriptor: String, reason: String },

    #[error("field '{field}' could not be evaluated: {reason}")]
    FieldEvaluation { field: String, reason: String },

    #[error("transform for descriptor '{descriptor}' failed: {reason}")]
    Postprocess { descriptor: String, reason: String },

    #[error("no usable mapping descriptor found")]
    NoUsableMapping,

    #[error("extension '{0}' not supported by pipeline")]
    UnsupportedFormat(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("acquisition failed: {0}")]
    Acquisition(String),

    #[error("imaging conversion failed: {0}")]
    Imaging(String),

    #[error("feature '{0}' is not enabled; rebuild with --features {0}")]
    FeatureNotEnabled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub fn write(err: impl std::fmt::Display) -> Self {
        ConvertError::Write(err.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::DescriptorLoad { .. } => "descriptor_load",
            ConvertError::ParseInvocation { .. } => "parse_invocation",
            ConvertError::FieldEvaluation { .. } => "field_evaluation",
            ConvertError::Postprocess { .. } => "postprocess",
            ConvertError::NoUsableMapping => "no_usable_mapping",
            ConvertError::UnsupportedFormat(_) => "unsupported_format",
            ConvertError::Write(_) => "write",
            ConvertError::Acquisition(_) => "acquisition",
            ConvertError::Imaging(_) => "imaging",
            ConvertError::FeatureNotEnabled(_) => "feature_not_enabled",
            ConvertError::Io(_) => "io",
        }
    }
}
