use std::io;

use tch::TchError;
use thiserror::Error;

/// Invalid encoder configuration.
///
/// These errors are detected when the encoder is built, before any
/// parameter is used.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// A probability is outside its valid range.
    #[error("{option} should be in {range}, was: {value}")]
    InvalidProbability {
        option: &'static str,
        range: &'static str,
        value: f64,
    },

    /// An option that is required in this setting is missing.
    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    /// A size or count option is not positive.
    #[error("{option} should be positive, was: {value}")]
    NonPositive { option: &'static str, value: i64 },

    /// A regularizer scale is negative.
    #[error("regularizer scale {option} should not be negative, was: {value}")]
    NegativeRegularizerScale { option: &'static str, value: f64 },

    /// A configured token is not in the vocabulary.
    #[error("token {token} in {option} is not in the vocabulary (size {vocab_size})")]
    TokenOutOfVocabulary {
        option: &'static str,
        token: i64,
        vocab_size: i64,
    },

    /// Weight tying requires the embedding size to be the output width
    /// of the last layer.
    #[error("weight tying requires the embedding size ({emb_size}) to match the last layer size ({hidden_size})")]
    WeightTyingMismatch { emb_size: i64, hidden_size: i64 },
}

/// Shapes that do not fit together.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShapeError {
    /// The recurrent state does not belong to the cell.
    #[error("incompatible recurrent state: {0}")]
    IncompatibleState(String),

    /// The source tensors do not have the expected shapes.
    #[error("malformed source tensors: {0}")]
    MalformedSource(String),

    /// The number of seed tokens is not the batch size.
    #[error("expected {expected} seed tokens, got {got}")]
    SeedTokenCount { expected: i64, got: usize },

    /// A residual connection was requested for a layer whose input and
    /// output sizes differ.
    #[error("skip connection of layer {layer} requires equal input ({input_size}) and output ({output_size}) sizes")]
    SkipConnection {
        layer: usize,
        input_size: i64,
        output_size: i64,
    },
}

/// Encoder errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncoderError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// Torch error.
    #[error(transparent)]
    Tch(#[from] TchError),

    #[error(transparent)]
    TomlDeserialization(#[from] toml::de::Error),
}
