use std::io::Read;

use serde::{Deserialize, Serialize};
use tch::nn::Init;

use crate::error::{ConfigurationError, EncoderError};
use crate::precision::Dtype;

/// The mode in which the encoder is used.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Teacher-forced decoding with dropout.
    Train,

    /// Teacher-forced decoding without dropout.
    Eval,

    /// Greedy generation from seed tokens.
    Infer,
}

impl Mode {
    /// Returns `true` if dropout should be applied.
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

/// Recurrent cell types.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Gru,
    Lstm,
}

/// Parameters of a single recurrent cell.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CellParams {
    /// Output (hidden state) size of the cell.
    pub num_units: i64,

    /// Bias that is added to the LSTM forget gate.
    #[serde(default = "default_forget_bias")]
    pub forget_bias: f64,

    /// Apply layer normalization to the LSTM gates and memory.
    #[serde(default)]
    pub layer_norm: bool,

    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Keep probability of the recurrent weights (DropConnect).
    ///
    /// The weight mask is sampled once per sequence.
    #[serde(default = "default_keep_prob")]
    pub recurrent_keep_prob: f64,
}

impl CellParams {
    /// Cell parameters with the given number of units and defaults
    /// for everything else.
    pub fn with_num_units(num_units: i64) -> Self {
        CellParams {
            num_units,
            forget_bias: default_forget_bias(),
            layer_norm: false,
            layer_norm_eps: default_layer_norm_eps(),
            recurrent_keep_prob: default_keep_prob(),
        }
    }

    fn validate(&self, option: &'static str) -> Result<(), ConfigurationError> {
        check_positive(option, self.num_units)?;
        check_keep_prob(option, self.recurrent_keep_prob)
    }
}

fn default_forget_bias() -> f64 {
    1.0
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

fn default_keep_prob() -> f64 {
    1.0
}

/// Weight regularizer types.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegularizerKind {
    L1,
    L1L2,
    L2,
}

/// Parameters used to instantiate a regularizer.
///
/// `l1` and `l2` use `scale`, `l1_l2` uses `scale_l1` and `scale_l2`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegularizerParams {
    pub scale: Option<f64>,
    pub scale_l1: Option<f64>,
    pub scale_l2: Option<f64>,
}

/// Parameter initializers for the embeddings and the output projection.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case", tag = "type")]
pub enum InitializerConfig {
    /// Uniform in *±sqrt(6 / (fan_in + fan_out))*.
    GlorotUniform,

    Normal { mean: f64, stdev: f64 },

    Uniform { lo: f64, up: f64 },
}

impl InitializerConfig {
    /// Get the initializer for a matrix with the given fan-in and fan-out.
    pub fn init(&self, fan_in: i64, fan_out: i64) -> Init {
        match *self {
            InitializerConfig::GlorotUniform => {
                let limit = (6. / (fan_in + fan_out) as f64).sqrt();
                Init::Uniform {
                    lo: -limit,
                    up: limit,
                }
            }
            InitializerConfig::Normal { mean, stdev } => Init::Randn { mean, stdev },
            InitializerConfig::Uniform { lo, up } => Init::Uniform { lo, up },
        }
    }
}

impl Default for InitializerConfig {
    fn default() -> Self {
        InitializerConfig::GlorotUniform
    }
}

/// Configuration provided by the model that owns the encoder.
///
/// Options that are not set on the encoder itself are inherited from
/// the model when the encoder is built.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default)]
    pub dtype: Dtype,

    pub initializer: Option<InitializerConfig>,

    pub regularizer: Option<RegularizerKind>,

    #[serde(default)]
    pub regularizer_params: RegularizerParams,
}

/// AWD-LSTM encoder configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    /// Batch size in training and evaluation. In inference, the batch
    /// size is the number of seed tokens and this option is not used.
    #[serde(default)]
    pub batch_size: Option<i64>,

    /// Recurrent cell type of all layers.
    pub core_cell: CellType,

    /// Parameters of the cells.
    pub core_cell_params: CellParams,

    /// Numeric precision, inherited from the model when absent.
    pub dtype: Option<Dtype>,

    pub emb_size: i64,

    /// Keep probability of the input of all but the last layer.
    #[serde(default = "default_keep_prob")]
    pub encoder_dp_input_keep_prob: f64,

    /// Keep probability of the output of all but the last layer.
    #[serde(default = "default_keep_prob")]
    pub encoder_dp_output_keep_prob: f64,

    /// Keep probability of the embedding matrix.
    #[serde(default = "default_keep_prob")]
    pub encoder_emb_keep_prob: f64,

    /// Keep probability of the input of the last layer.
    #[serde(default = "default_keep_prob")]
    pub encoder_last_input_keep_prob: f64,

    /// Keep probability of the output of the last layer.
    #[serde(default = "default_keep_prob")]
    pub encoder_last_output_keep_prob: f64,

    /// Number of recurrent layers.
    pub encoder_layers: i64,

    pub encoder_use_skip_connections: bool,

    /// Generation stops when every sequence has produced this token.
    pub end_token: i64,

    /// Use a bias in the output projection.
    #[serde(default = "default_true")]
    pub fc_use_bias: bool,

    /// Initializer, inherited from the model when absent.
    pub initializer: Option<InitializerConfig>,

    /// Parameters of the last cell, used when weights are tied.
    pub last_cell_params: Option<CellParams>,

    /// Name of the parameter scope of the encoder.
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of generated tokens in inference.
    pub num_tokens_gen: Option<i64>,

    pub output_dim: i64,

    /// Regularizer, inherited from the model when absent.
    pub regularizer: Option<RegularizerKind>,

    pub regularizer_params: Option<RegularizerParams>,

    /// Probability of feeding the previous prediction rather than the
    /// ground truth when `schedule_learning` is enabled.
    #[serde(default)]
    pub sampling_prob: f64,

    /// Use scheduled sampling in training and evaluation.
    #[serde(default)]
    pub schedule_learning: bool,

    /// Tokens to start generation from, one per sequence.
    pub seed_tokens: Option<Vec<i64>>,

    /// Sequence tensors have shape `[time, batch]` rather than
    /// `[batch, time]`.
    #[serde(default)]
    pub time_major: bool,

    /// Move per-step outputs to host memory while decoding.
    #[serde(default)]
    pub use_swap_memory: bool,

    /// Hold dropout masks fixed across the time steps of a sequence.
    #[serde(default)]
    pub variational_recurrent: bool,

    pub vocab_size: i64,

    /// Use the transposed output projection as the embedding matrix.
    #[serde(default)]
    pub weight_tied: bool,
}

pub(crate) const DEFAULT_MAX_GENERATED_TOKENS: i64 = 200;

fn default_name() -> String {
    "rnn_encoder_awd".to_string()
}

fn default_true() -> bool {
    true
}

impl EncoderConfig {
    /// Parameters of the last cell of the stack.
    ///
    /// With weight tying, the last cell must produce states of the
    /// embedding size, so it uses `last_cell_params`. Otherwise all
    /// cells use `core_cell_params`.
    pub fn last_layer_params(&self) -> Result<&CellParams, ConfigurationError> {
        if self.weight_tied {
            self.last_cell_params
                .as_ref()
                .ok_or(ConfigurationError::MissingOption("last_cell_params"))
        } else {
            Ok(&self.core_cell_params)
        }
    }

    /// Maximum number of tokens to generate in inference.
    pub fn max_generated_tokens(&self) -> i64 {
        self.num_tokens_gen.unwrap_or(DEFAULT_MAX_GENERATED_TOKENS)
    }

    /// Validate the configuration for use in the given mode.
    pub fn validate(&self, mode: Mode) -> Result<(), ConfigurationError> {
        check_positive("vocab_size", self.vocab_size)?;
        check_positive("emb_size", self.emb_size)?;
        check_positive("encoder_layers", self.encoder_layers)?;
        match (mode, self.batch_size) {
            (_, Some(batch_size)) => check_positive("batch_size", batch_size)?,
            (Mode::Infer, None) => (),
            (Mode::Train, None) | (Mode::Eval, None) => {
                return Err(ConfigurationError::MissingOption("batch_size"))
            }
        }
        check_positive("output_dim", self.output_dim)?;

        self.core_cell_params.validate("core_cell_params")?;
        if let Some(ref params) = self.last_cell_params {
            params.validate("last_cell_params")?;
        }
        self.last_layer_params()?;

        check_keep_prob("encoder_dp_input_keep_prob", self.encoder_dp_input_keep_prob)?;
        check_keep_prob(
            "encoder_dp_output_keep_prob",
            self.encoder_dp_output_keep_prob,
        )?;
        check_keep_prob(
            "encoder_last_input_keep_prob",
            self.encoder_last_input_keep_prob,
        )?;
        check_keep_prob(
            "encoder_last_output_keep_prob",
            self.encoder_last_output_keep_prob,
        )?;
        check_keep_prob("encoder_emb_keep_prob", self.encoder_emb_keep_prob)?;

        if !(0.0..=1.0).contains(&self.sampling_prob) {
            return Err(ConfigurationError::InvalidProbability {
                option: "sampling_prob",
                range: "[0, 1]",
                value: self.sampling_prob,
            });
        }

        check_positive("num_tokens_gen", self.max_generated_tokens())?;
        self.check_token("end_token", self.end_token)?;

        if mode == Mode::Infer {
            let seed_tokens = self
                .seed_tokens
                .as_ref()
                .ok_or(ConfigurationError::MissingOption("seed_tokens"))?;
            if seed_tokens.is_empty() {
                return Err(ConfigurationError::MissingOption("seed_tokens"));
            }
            for &token in seed_tokens {
                self.check_token("seed_tokens", token)?;
            }
        }

        Ok(())
    }

    pub(crate) fn check_token(&self, option: &'static str, token: i64) -> Result<(), ConfigurationError> {
        if token < 0 || token >= self.vocab_size {
            return Err(ConfigurationError::TokenOutOfVocabulary {
                option,
                token,
                vocab_size: self.vocab_size,
            });
        }

        Ok(())
    }
}

fn check_keep_prob(option: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value <= 0.0 || value > 1.0 {
        return Err(ConfigurationError::InvalidProbability {
            option,
            range: "(0, 1]",
            value,
        });
    }

    Ok(())
}

fn check_positive(option: &'static str, value: i64) -> Result<(), ConfigurationError> {
    if value <= 0 {
        return Err(ConfigurationError::NonPositive { option, value });
    }

    Ok(())
}

/// Configuration file with the model and encoder sections.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    pub encoder: EncoderConfig,
}

pub trait TomlRead
where
    Self: Sized,
{
    fn from_toml_read(read: impl Read) -> Result<Self, EncoderError>;
}

impl TomlRead for Config {
    fn from_toml_read(mut read: impl Read) -> Result<Self, EncoderError> {
        let mut data = String::new();
        read.read_to_string(&mut data)?;
        let config: Config = toml::from_str(&data)?;
        Ok(config)
    }
}
