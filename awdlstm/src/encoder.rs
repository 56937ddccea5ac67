//! AWD-LSTM encoder.

use awdlstm_tch_ext::PathExt;
use log::{debug, warn};
use tch::{Kind, Tensor};

use crate::config::{EncoderConfig, Mode, ModelConfig};
use crate::decode::{DecodeDriver, DecodeStrategy, GroundTruth};
use crate::error::{ConfigurationError, EncoderError, ShapeError};
use crate::module::RecurrentModule;
use crate::precision::Dtype;
use crate::regularizer::{total_penalty, MixedPrecision, Regularize, Regularizer};
use crate::stack::{CellStack, LayerConfig, StackConfig, StackState};
use crate::vocab::{VocabConfig, VocabParameters};

/// Builder of AWD-LSTM encoders.
///
/// Options that the encoder configuration leaves open are taken from
/// the configuration of the owning model, see
/// [`EncoderBuilder::model_defaults`].
#[derive(Clone, Debug)]
pub struct EncoderBuilder<'a> {
    config: EncoderConfig,
    mode: Mode,
    model: Option<&'a ModelConfig>,
}

impl<'a> EncoderBuilder<'a> {
    pub fn new(config: EncoderConfig, mode: Mode) -> Self {
        EncoderBuilder {
            config,
            mode,
            model: None,
        }
    }

    /// Inherit unset options from the model configuration.
    ///
    /// The encoder inherits the precision, the initializer, and the
    /// regularizer with its parameters.
    pub fn model_defaults(mut self, model: &'a ModelConfig) -> Self {
        self.model = Some(model);
        self
    }

    /// Build the encoder.
    ///
    /// The variables of the encoder are created below a path with the
    /// name of the encoder.
    pub fn build(self, vs: &PathExt) -> Result<AwdLstmEncoder, EncoderError> {
        let EncoderBuilder {
            mut config,
            mode,
            model,
        } = self;

        if let Some(model) = model {
            if config.dtype.is_none() {
                config.dtype = Some(model.dtype);
            }
            if config.initializer.is_none() {
                config.initializer = model.initializer.clone();
            }
            if config.regularizer.is_none() && model.regularizer.is_some() {
                config.regularizer = model.regularizer;
                config.regularizer_params = Some(model.regularizer_params.clone());
            }
        }

        config.validate(mode)?;

        if config.output_dim != config.vocab_size {
            warn!(
                "output_dim ({}) differs from vocab_size ({}), logits have vocab_size entries",
                config.output_dim, config.vocab_size
            );
        }

        let dtype = config.dtype.unwrap_or_default();

        let regularizer: Option<Box<dyn Regularize>> = match config.regularizer {
            Some(kind) => {
                let params = config.regularizer_params.clone().unwrap_or_default();
                let regularizer = Regularizer::new(kind, &params)?;
                if dtype.is_mixed() {
                    Some(Box::new(MixedPrecision::new(regularizer)))
                } else {
                    Some(Box::new(regularizer))
                }
            }
            None => None,
        };

        let batch_size = match mode {
            Mode::Infer => config
                .seed_tokens
                .as_ref()
                .map(|seed_tokens| seed_tokens.len() as i64)
                .ok_or(ConfigurationError::MissingOption("seed_tokens"))?,
            Mode::Train | Mode::Eval => config
                .batch_size
                .ok_or(ConfigurationError::MissingOption("batch_size"))?,
        };

        let encoder_vs = vs.sub(&config.name);
        let n_regularized = vs.regularized_variables().len();

        let last_params = config.last_layer_params()?.clone();

        let vocab = VocabParameters::new(
            &encoder_vs,
            &VocabConfig {
                vocab_size: config.vocab_size,
                emb_size: config.emb_size,
                hidden_size: last_params.num_units,
                weight_tied: config.weight_tied,
                use_bias: config.fc_use_bias,
                initializer: config.initializer.clone().unwrap_or_default(),
            },
        )?;

        let stack = CellStack::new(
            &encoder_vs,
            &StackConfig {
                cell_type: config.core_cell,
                input_size: config.emb_size,
                num_layers: config.encoder_layers as usize,
                body: LayerConfig {
                    params: config.core_cell_params.clone(),
                    input_keep_prob: config.encoder_dp_input_keep_prob,
                    output_keep_prob: config.encoder_dp_output_keep_prob,
                },
                last: LayerConfig {
                    params: last_params,
                    input_keep_prob: config.encoder_last_input_keep_prob,
                    output_keep_prob: config.encoder_last_output_keep_prob,
                },
                residual: config.encoder_use_skip_connections,
                variational: config.variational_recurrent,
            },
        )?;

        let regularized = vs
            .regularized_variables()
            .into_iter()
            .skip(n_regularized)
            .map(|var| {
                debug!("Regularizing {}", var.name);
                var.tensor
            })
            .collect();

        debug!(
            "Built encoder '{}' for {:?}: {} {:?} layers, vocab size: {}, tied: {}, dtype: {:?}",
            config.name,
            mode,
            stack.num_layers(),
            config.core_cell,
            config.vocab_size,
            vocab.is_tied(),
            dtype
        );

        Ok(AwdLstmEncoder {
            batch_size,
            config,
            dtype,
            mode,
            regularized,
            regularizer,
            stack,
            vocab,
        })
    }
}

/// Source sequences.
#[derive(Debug)]
pub struct SourceTensors<'a> {
    /// Token identifiers, `[batch_size, time]` or `[time, batch_size]`
    /// when the encoder is time-major.
    pub token_ids: &'a Tensor,

    /// Sequence lengths, `[batch_size]`.
    pub lengths: &'a Tensor,
}

/// Encoder input.
#[derive(Debug, Default)]
pub struct EncoderInput<'a> {
    /// The source sequences, required in training and evaluation.
    pub source_tensors: Option<SourceTensors<'a>>,

    /// Seed tokens that replace the configured seed tokens in
    /// inference.
    pub seed_tokens: Option<&'a [i64]>,
}

/// Encoder output.
#[derive(Debug)]
pub struct EncoderOutput {
    /// Vocabulary logits, `[batch_size, steps, vocab_size]` or
    /// `[steps, batch_size, vocab_size]` when the encoder is
    /// time-major.
    pub logits: Tensor,

    /// Highest-scoring tokens, `[batch_size, steps]` or
    /// `[steps, batch_size]`.
    pub outputs: Tensor,

    /// Tokens that were consumed in each step.
    pub input_ids: Tensor,

    pub final_state: StackState,

    /// Number of steps of each sequence, `[batch_size]`.
    pub final_sequence_lengths: Tensor,
}

/// AWD-LSTM encoder.
///
/// In training and evaluation, the encoder predicts the next token of
/// each prefix of the source sequences using teacher forcing or
/// scheduled sampling. In inference, it greedily generates sequences
/// starting from seed tokens.
#[derive(Debug)]
pub struct AwdLstmEncoder {
    batch_size: i64,
    config: EncoderConfig,
    dtype: Dtype,
    mode: Mode,
    regularized: Vec<Tensor>,
    regularizer: Option<Box<dyn Regularize>>,
    stack: CellStack,
    vocab: VocabParameters,
}

impl AwdLstmEncoder {
    /// The batch size.
    ///
    /// In inference, this is the number of configured seed tokens.
    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// The kind of the activations.
    pub fn compute_kind(&self) -> Kind {
        self.dtype.compute_kind()
    }

    /// The resolved configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Encode the input.
    pub fn encode(&self, input: &EncoderInput) -> Result<EncoderOutput, EncoderError> {
        let train = self.mode.is_train();

        let embeddings = self.vocab.dropped_embedding(
            self.config.encoder_emb_keep_prob,
            self.compute_kind(),
            train,
        )?;

        let driver = DecodeDriver::new(&self.stack, &self.vocab, &embeddings)
            .output_time_major(self.config.time_major)
            .swap_memory(self.config.use_swap_memory);

        let output = match self.mode {
            Mode::Train | Mode::Eval => {
                let source = input.source_tensors.as_ref().ok_or_else(|| {
                    ShapeError::MalformedSource(format!(
                        "source tensors are required in {:?} mode",
                        self.mode
                    ))
                })?;
                let (token_ids, lengths) = self.time_major_source(source)?;

                let strategy = if self.config.schedule_learning {
                    DecodeStrategy::ScheduledSample {
                        sampling_probability: self.config.sampling_prob,
                    }
                } else {
                    DecodeStrategy::TeacherForced
                };

                driver.decode(
                    &strategy,
                    Some(&GroundTruth {
                        token_ids: &token_ids,
                        lengths: &lengths,
                    }),
                    train,
                )?
            }
            Mode::Infer => {
                let seed_tokens = self.seed_tokens(input.seed_tokens)?;
                driver.decode(
                    &DecodeStrategy::GreedyAutoregressive {
                        seed_tokens,
                        end_token: self.config.end_token,
                        max_steps: self.config.max_generated_tokens(),
                    },
                    None,
                    train,
                )?
            }
        };

        Ok(EncoderOutput {
            logits: output.logits,
            outputs: output.sample_ids,
            input_ids: output.input_ids,
            final_state: output.final_state,
            final_sequence_lengths: output.final_sequence_lengths,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The variables that the regularizer is applied to.
    pub fn regularized_variables(&self) -> &[Tensor] {
        &self.regularized
    }

    /// The regularization penalty of the encoder variables.
    ///
    /// Returns `None` when the encoder does not use a regularizer.
    pub fn regularization_loss(&self) -> Result<Option<Tensor>, EncoderError> {
        match self.regularizer {
            Some(ref regularizer) => Ok(total_penalty(&**regularizer, &self.regularized)?),
            None => Ok(None),
        }
    }

    pub fn stack(&self) -> &CellStack {
        &self.stack
    }

    pub fn vocab(&self) -> &VocabParameters {
        &self.vocab
    }

    /// The initial state of the cell stack for the encoder batch size.
    pub fn zero_state(&self) -> Result<StackState, EncoderError> {
        self.stack
            .zero_state(self.batch_size, self.compute_kind(), self.mode.is_train())
    }

    fn seed_tokens<'a>(&'a self, seed_tokens: Option<&'a [i64]>) -> Result<&'a [i64], EncoderError> {
        let seed_tokens = match seed_tokens {
            Some(seed_tokens) => seed_tokens,
            None => self.config.seed_tokens.as_deref().unwrap_or(&[]),
        };

        if seed_tokens.is_empty() || seed_tokens.len() as i64 != self.batch_size {
            return Err(ShapeError::SeedTokenCount {
                expected: self.batch_size,
                got: seed_tokens.len(),
            }
            .into());
        }

        for &token in seed_tokens {
            self.config.check_token("seed_tokens", token)?;
        }

        Ok(seed_tokens)
    }

    /// Validate the source tensors and convert them to time-major
    /// token identifiers and `i64` lengths.
    fn time_major_source(&self, source: &SourceTensors) -> Result<(Tensor, Tensor), EncoderError> {
        let token_ids = source.token_ids;
        if token_ids.dim() != 2 {
            return Err(ShapeError::MalformedSource(format!(
                "token identifiers should have rank 2, has rank {}",
                token_ids.dim()
            ))
            .into());
        }

        let token_ids = if self.config.time_major {
            token_ids.shallow_clone()
        } else {
            token_ids.f_transpose(0, 1)?
        };

        let (time, batch_size) = (token_ids.size()[0], token_ids.size()[1]);
        if batch_size != self.batch_size {
            return Err(ShapeError::MalformedSource(format!(
                "expected batch size {}, got {}",
                self.batch_size, batch_size
            ))
            .into());
        }

        if source.lengths.size() != [batch_size] {
            return Err(ShapeError::MalformedSource(format!(
                "expected {} sequence lengths, lengths have shape {:?}",
                batch_size,
                source.lengths.size()
            ))
            .into());
        }

        let lengths = source.lengths.f_to_kind(Kind::Int64)?;
        let (min_length, max_length) = (
            lengths.f_min()?.f_int64_value(&[])?,
            lengths.f_max()?.f_int64_value(&[])?,
        );
        if min_length < 0 || max_length > time {
            return Err(ShapeError::MalformedSource(format!(
                "sequence lengths should be in [0, {}], were in [{}, {}]",
                time, min_length, max_length
            ))
            .into());
        }

        Ok((token_ids, lengths))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::convert::{TryFrom, TryInto};

    use approx::assert_abs_diff_eq;
    use awdlstm_tch_ext::RootExt;
    use maplit::btreeset;
    use tch::nn::VarStore;
    use tch::{Device, Kind, Tensor};

    use crate::config::{
        CellParams, EncoderConfig, Mode, ModelConfig, RegularizerKind, RegularizerParams,
    };
    use crate::encoder::{AwdLstmEncoder, EncoderBuilder, EncoderInput, SourceTensors};
    use crate::error::{ConfigurationError, EncoderError, ShapeError};
    use crate::precision::Dtype;
    use crate::testing::small_config;

    fn build(vs: &VarStore, config: EncoderConfig, mode: Mode) -> AwdLstmEncoder {
        EncoderBuilder::new(config, mode)
            .build(&vs.root_ext(|_| 0))
            .unwrap()
    }

    fn source() -> (Tensor, Tensor) {
        (
            Tensor::from_slice(&[1i64, 4, 2, 0, 0, 3, 5, 7, 8, 6]).view([2, 5]),
            Tensor::from_slice(&[3i64, 5]),
        )
    }

    fn input<'a>(token_ids: &'a Tensor, lengths: &'a Tensor) -> EncoderInput<'a> {
        EncoderInput {
            source_tensors: Some(SourceTensors { token_ids, lengths }),
            seed_tokens: None,
        }
    }

    #[test]
    fn encodes_batch_major_sequences() {
        let vs = VarStore::new(Device::Cpu);
        let encoder = build(&vs, small_config(), Mode::Eval);

        let (token_ids, lengths) = source();
        let output = encoder.encode(&input(&token_ids, &lengths)).unwrap();

        assert_eq!(output.logits.size(), &[2, 5, 10]);
        assert_eq!(output.outputs.size(), &[2, 5]);
        assert_eq!(output.input_ids, token_ids);
        assert_eq!(
            Vec::<i64>::try_from(&output.final_sequence_lengths).unwrap(),
            vec![3, 5]
        );
        assert_eq!(output.final_state.layers.len(), 2);
        assert_eq!(output.final_state.layers[0].cell.hidden.size(), &[2, 6]);
        // Untied: the last layer uses the core cell parameters.
        assert_eq!(output.final_state.layers[1].cell.hidden.size(), &[2, 6]);
    }

    #[test]
    fn zero_state_has_layer_per_cell() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.last_cell_params = None;
        config.encoder_layers = 3;
        let encoder = build(&vs, config, Mode::Train);

        let state = encoder.zero_state().unwrap();
        assert_eq!(state.stacked_hidden().unwrap().size(), &[3, 2, 6]);
    }

    #[test]
    fn variables_are_below_encoder_name() {
        let vs = VarStore::new(Device::Cpu);
        let _encoder = build(&vs, small_config(), Mode::Train);

        let names = vs.variables().into_keys().collect::<BTreeSet<_>>();
        assert_eq!(
            names,
            btreeset![
                "rnn_encoder_awd.EncoderEmbeddingMatrix".to_string(),
                "rnn_encoder_awd.cell_0.bias".to_string(),
                "rnn_encoder_awd.cell_0.input_kernel".to_string(),
                "rnn_encoder_awd.cell_0.recurrent_kernel".to_string(),
                "rnn_encoder_awd.cell_1.bias".to_string(),
                "rnn_encoder_awd.cell_1.input_kernel".to_string(),
                "rnn_encoder_awd.cell_1.recurrent_kernel".to_string(),
                "rnn_encoder_awd.dense.bias".to_string(),
                "rnn_encoder_awd.dense.kernel".to_string(),
            ]
        );
    }

    #[test]
    fn tied_weights_share_storage() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.weight_tied = true;
        let encoder = build(&vs, config, Mode::Eval);

        assert!(encoder.vocab().is_tied());
        assert!(!vs
            .variables()
            .contains_key("rnn_encoder_awd.EncoderEmbeddingMatrix"));

        let embeddings = encoder.vocab().as_embedding().unwrap();
        assert_eq!(embeddings.size(), &[10, 4]);
        assert_eq!(&*embeddings, &encoder.vocab().as_projection().transpose(0, 1));
        assert_eq!(embeddings.data_ptr(), encoder.vocab().as_projection().data_ptr());

        let (token_ids, lengths) = source();
        let output = encoder.encode(&input(&token_ids, &lengths)).unwrap();
        assert_eq!(output.logits.size(), &[2, 5, 10]);
    }

    #[test]
    fn tied_weights_need_matching_last_layer() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.weight_tied = true;
        config.last_cell_params = Some(CellParams::with_num_units(6));
        assert!(matches!(
            EncoderBuilder::new(config, Mode::Train).build(&vs.root_ext(|_| 0)),
            Err(EncoderError::Configuration(_))
        ));
    }

    #[test]
    fn teacher_forcing_is_deterministic_without_sampling() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.schedule_learning = true;
        config.sampling_prob = 0.0;
        let encoder = build(&vs, config, Mode::Train);

        let (token_ids, lengths) = source();
        let first = encoder.encode(&input(&token_ids, &lengths)).unwrap();
        let second = encoder.encode(&input(&token_ids, &lengths)).unwrap();

        assert_eq!(first.logits, second.logits);
        assert_eq!(first.input_ids, token_ids);
    }

    #[test]
    fn time_major_is_transposed_batch_major() {
        let vs_batch = VarStore::new(Device::Cpu);
        let batch_major = build(&vs_batch, small_config(), Mode::Eval);

        let mut vs_time = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.time_major = true;
        config.use_swap_memory = true;
        let time_major = build(&vs_time, config, Mode::Eval);
        vs_time.copy(&vs_batch).unwrap();

        let (token_ids, lengths) = source();
        let batch_output = batch_major.encode(&input(&token_ids, &lengths)).unwrap();

        let token_ids = token_ids.transpose(0, 1);
        let time_output = time_major.encode(&input(&token_ids, &lengths)).unwrap();

        assert_eq!(time_output.logits.size(), &[5, 2, 10]);
        let expected: ndarray::ArrayD<f32> =
            (&batch_output.logits.transpose(0, 1)).try_into().unwrap();
        let actual: ndarray::ArrayD<f32> = (&time_output.logits).try_into().unwrap();
        assert_abs_diff_eq!(actual, expected, epsilon = 1e-6);
        assert_eq!(
            time_output.final_sequence_lengths,
            batch_output.final_sequence_lengths
        );
    }

    #[test]
    fn skip_connection_mismatch_fails_at_build() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.encoder_use_skip_connections = true;
        assert!(matches!(
            EncoderBuilder::new(config, Mode::Train).build(&vs.root_ext(|_| 0)),
            Err(EncoderError::Shape(ShapeError::SkipConnection { layer: 0, .. }))
        ));
    }

    #[test]
    fn skip_connections_with_equal_sizes() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.encoder_use_skip_connections = true;
        config.core_cell_params = CellParams::with_num_units(4);
        let encoder = build(&vs, config, Mode::Eval);

        let (token_ids, lengths) = source();
        let output = encoder.encode(&input(&token_ids, &lengths)).unwrap();
        assert_eq!(output.logits.size(), &[2, 5, 10]);
    }

    #[test]
    fn inference_batch_size_is_seed_count() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.batch_size = None;
        config.seed_tokens = Some(vec![1, 2, 3]);
        let encoder = build(&vs, config.clone(), Mode::Infer);
        assert_eq!(encoder.batch_size(), 3);

        let vs = VarStore::new(Device::Cpu);
        assert!(matches!(
            EncoderBuilder::new(config, Mode::Train).build(&vs.root_ext(|_| 0)),
            Err(EncoderError::Configuration(ConfigurationError::MissingOption(
                "batch_size"
            )))
        ));
    }

    #[test]
    fn generates_from_seed_tokens() {
        let vs = VarStore::new(Device::Cpu);
        let mut config = small_config();
        config.num_tokens_gen = Some(3);
        let encoder = build(&vs, config, Mode::Infer);
        assert_eq!(encoder.batch_size(), 2);

        let output = tch::no_grad(|| encoder.encode(&EncoderInput::default())).unwrap();

        let steps = output.logits.size()[1];
        assert!(steps >= 1 && steps <= 3);
        assert_eq!(output.logits.size(), &[2, steps, 10]);
        assert_eq!(
            Vec::<i64>::try_from(&output.input_ids.select(1, 0)).unwrap(),
            vec![1, 2]
        );
        for length in Vec::<i64>::try_from(&output.final_sequence_lengths).unwrap() {
            assert!(length >= 1 && length <= steps);
        }

        // Inputs after the seeds are the previous predictions.
        if steps > 1 {
            assert_eq!(
                output.input_ids.narrow(1, 1, steps - 1),
                output.outputs.narrow(1, 0, steps - 1)
            );
        }
    }

    #[test]
    fn seed_token_count_must_match_batch() {
        let vs = VarStore::new(Device::Cpu);
        let encoder = build(&vs, small_config(), Mode::Infer);
        let input = EncoderInput {
            source_tensors: None,
            seed_tokens: Some(&[1, 2, 3]),
        };
        assert!(matches!(
            encoder.encode(&input),
            Err(EncoderError::Shape(ShapeError::SeedTokenCount {
                expected: 2,
                got: 3
            }))
        ));
    }

    #[test]
    fn malformed_sources_are_rejected() {
        let vs = VarStore::new(Device::Cpu);
        let encoder = build(&vs, small_config(), Mode::Eval);

        assert!(matches!(
            encoder.encode(&EncoderInput::default()),
            Err(EncoderError::Shape(ShapeError::MalformedSource(_)))
        ));

        let token_ids = Tensor::zeros(&[3, 5], (Kind::Int64, Device::Cpu));
        let lengths = Tensor::from_slice(&[5i64, 5, 5]);
        assert!(matches!(
            encoder.encode(&input(&token_ids, &lengths)),
            Err(EncoderError::Shape(ShapeError::MalformedSource(_)))
        ));

        let token_ids = Tensor::zeros(&[2, 5], (Kind::Int64, Device::Cpu));
        let lengths = Tensor::from_slice(&[6i64, 5]);
        assert!(matches!(
            encoder.encode(&input(&token_ids, &lengths)),
            Err(EncoderError::Shape(ShapeError::MalformedSource(_)))
        ));
    }

    #[test]
    fn regularizer_is_inherited_from_model() {
        let model = ModelConfig {
            regularizer: Some(RegularizerKind::L2),
            regularizer_params: RegularizerParams {
                scale: Some(0.5),
                ..RegularizerParams::default()
            },
            ..ModelConfig::default()
        };

        let vs = VarStore::new(Device::Cpu);
        let encoder = EncoderBuilder::new(small_config(), Mode::Train)
            .model_defaults(&model)
            .build(&vs.root_ext(|_| 0))
            .unwrap();

        // Two kernels per cell and the projection kernel.
        assert_eq!(encoder.regularized_variables().len(), 5);
        assert_eq!(encoder.config().regularizer, Some(RegularizerKind::L2));

        let expected = encoder
            .regularized_variables()
            .iter()
            .map(|var| var.square().sum(Kind::Float).double_value(&[]) * 0.25)
            .sum::<f64>();
        let loss = encoder.regularization_loss().unwrap().unwrap();
        assert_abs_diff_eq!(loss.double_value(&[]), expected, epsilon = 1e-4);
    }

    #[test]
    fn no_regularization_loss_without_regularizer() {
        let vs = VarStore::new(Device::Cpu);
        let encoder = build(&vs, small_config(), Mode::Train);
        assert!(encoder.regularization_loss().unwrap().is_none());
    }

    #[test]
    fn mixed_precision_computes_in_half() {
        let model = ModelConfig {
            dtype: Dtype::Mixed,
            regularizer: Some(RegularizerKind::L1),
            regularizer_params: RegularizerParams {
                scale: Some(1e-3),
                ..RegularizerParams::default()
            },
            ..ModelConfig::default()
        };

        let vs = VarStore::new(Device::Cpu);
        let encoder = EncoderBuilder::new(small_config(), Mode::Train)
            .model_defaults(&model)
            .build(&vs.root_ext(|_| 0))
            .unwrap();

        assert_eq!(encoder.dtype(), Dtype::Mixed);
        assert_eq!(encoder.compute_kind(), Kind::Half);
        assert_eq!(
            encoder.regularization_loss().unwrap().unwrap().kind(),
            Kind::Float
        );
    }

    #[test]
    fn encoder_options_override_model() {
        let model = ModelConfig {
            dtype: Dtype::Float16,
            regularizer: Some(RegularizerKind::L1),
            regularizer_params: RegularizerParams {
                scale: Some(1e-3),
                ..RegularizerParams::default()
            },
            ..ModelConfig::default()
        };

        let mut config = small_config();
        config.dtype = Some(Dtype::Float32);
        config.regularizer = Some(RegularizerKind::L2);
        config.regularizer_params = Some(RegularizerParams {
            scale: Some(1e-4),
            ..RegularizerParams::default()
        });

        let vs = VarStore::new(Device::Cpu);
        let encoder = EncoderBuilder::new(config, Mode::Train)
            .model_defaults(&model)
            .build(&vs.root_ext(|_| 0))
            .unwrap();

        assert_eq!(encoder.dtype(), Dtype::Float32);
        assert_eq!(encoder.config().regularizer, Some(RegularizerKind::L2));
        assert_eq!(
            encoder.config().regularizer_params.as_ref().unwrap().scale,
            Some(1e-4)
        );
    }
}
