//! AWD-LSTM language model encoder.
//!
//! The encoder embeds token sequences, runs them through a stack of
//! regularized recurrent cells, and projects the outputs to vocabulary
//! logits. In training and evaluation the next-token predictions are
//! made with teacher forcing or scheduled sampling; in inference the
//! encoder generates sequences greedily from seed tokens.

pub mod cells;

pub mod config;

mod cow;
pub use cow::CowTensor;

pub mod decode;

pub mod encoder;
pub use encoder::{AwdLstmEncoder, EncoderBuilder, EncoderInput, EncoderOutput, SourceTensors};

pub mod error;

pub mod layers;

pub mod module;

pub mod precision;

pub mod regularizer;

pub mod stack;

#[cfg(test)]
pub(crate) mod testing;

pub mod vocab;
