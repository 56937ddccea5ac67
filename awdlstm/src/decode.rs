//! Step-wise decoding with a recurrent unit.
//!
//! The decode driver runs a recurrent unit one time step at a time. In
//! every step, the input tokens are embedded, the unit is applied, and
//! its output is projected to vocabulary logits. A [`DecodeStrategy`]
//! determines which tokens are used as the next inputs and when a
//! sequence is finished.

use tch::{Device, Kind, TchError, Tensor};

use crate::error::{EncoderError, ShapeError};
use crate::module::{FallibleModule, RecurrentModule};

/// Selection of the inputs of each decoding step.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeStrategy<'a> {
    /// Use the ground truth token of every step.
    ///
    /// A sequence is finished after consuming its length in tokens.
    TeacherForced,

    /// Use the previous prediction in place of the ground truth with
    /// the given probability.
    ///
    /// The choice is made per sequence and step. The first step always
    /// uses the ground truth. Sequences finish as in teacher forcing.
    ScheduledSample { sampling_probability: f64 },

    /// Use the previous prediction as the next input.
    ///
    /// The first step uses the seed tokens, one per sequence. A
    /// sequence is finished when it has predicted the end token. At
    /// most `max_steps` steps are taken.
    GreedyAutoregressive {
        seed_tokens: &'a [i64],
        end_token: i64,
        max_steps: i64,
    },
}

/// Ground truth sequences.
#[derive(Debug)]
pub struct GroundTruth<'a> {
    /// Token identifiers, `[time, batch_size]`.
    pub token_ids: &'a Tensor,

    /// Sequence lengths, `[batch_size]`.
    pub lengths: &'a Tensor,
}

/// Output of the decode driver.
#[derive(Debug)]
pub struct DecodeOutput<S> {
    /// Logits, `[steps, batch_size, vocab_size]` when time-major,
    /// otherwise `[batch_size, steps, vocab_size]`.
    pub logits: Tensor,

    /// The best-scoring token of each step.
    pub sample_ids: Tensor,

    /// The tokens that were used as input in each step.
    pub input_ids: Tensor,

    /// State of the recurrent unit after the last step.
    pub final_state: S,

    /// The number of steps that each sequence took before it was
    /// finished, `[batch_size]`.
    pub final_sequence_lengths: Tensor,
}

/// Per-step outputs.
struct StepRecords {
    logits: Vec<Tensor>,
    sample_ids: Vec<Tensor>,
    input_ids: Vec<Tensor>,
    swap_memory: bool,
}

impl StepRecords {
    fn new(swap_memory: bool) -> Self {
        StepRecords {
            logits: Vec::new(),
            sample_ids: Vec::new(),
            input_ids: Vec::new(),
            swap_memory,
        }
    }

    fn push(&mut self, logits: &Tensor, sample_ids: &Tensor, input_ids: &Tensor) {
        let swap_memory = self.swap_memory;
        let store = |tensor: &Tensor| {
            if swap_memory {
                tensor.to_device(Device::Cpu)
            } else {
                tensor.shallow_clone()
            }
        };

        self.logits.push(store(logits));
        self.sample_ids.push(store(sample_ids));
        self.input_ids.push(store(input_ids));
    }

    /// Stack the records along the time axis.
    fn assemble(
        &self,
        device: Device,
        time_major: bool,
    ) -> Result<(Tensor, Tensor, Tensor), TchError> {
        let stack = |records: &[Tensor]| -> Result<Tensor, TchError> {
            let stacked = Tensor::f_stack(records, 0)?.to_device(device);
            if time_major {
                Ok(stacked)
            } else {
                stacked.f_transpose(0, 1)
            }
        };

        Ok((
            stack(&self.logits)?,
            stack(&self.sample_ids)?,
            stack(&self.input_ids)?,
        ))
    }
}

/// Driver of the decoding loop.
#[derive(Debug)]
pub struct DecodeDriver<'a, U> {
    unit: &'a U,
    projection: &'a dyn FallibleModule<Error = TchError>,
    embeddings: &'a Tensor,
    output_time_major: bool,
    swap_memory: bool,
}

impl<'a, U> DecodeDriver<'a, U>
where
    U: RecurrentModule,
    EncoderError: From<U::Error>,
{
    /// Construct a decode driver.
    ///
    /// `embeddings` is the embedding matrix of shape
    /// `[vocab_size, input_size]`; its kind is the kind of the
    /// computations. `projection` maps the unit outputs to logits.
    pub fn new(
        unit: &'a U,
        projection: &'a dyn FallibleModule<Error = TchError>,
        embeddings: &'a Tensor,
    ) -> Self {
        DecodeDriver {
            unit,
            projection,
            embeddings,
            output_time_major: false,
            swap_memory: false,
        }
    }

    /// Return outputs with the time axis first.
    pub fn output_time_major(mut self, output_time_major: bool) -> Self {
        self.output_time_major = output_time_major;
        self
    }

    /// Keep the per-step outputs in host memory until the end of
    /// decoding.
    pub fn swap_memory(mut self, swap_memory: bool) -> Self {
        self.swap_memory = swap_memory;
        self
    }

    /// Decode with the given strategy.
    ///
    /// The teacher-forced strategies require ground truth. Decoding
    /// stops when all sequences are finished. Finished sequences are
    /// still stepped while other sequences are unfinished; their
    /// outputs and state are not masked.
    pub fn decode(
        &self,
        strategy: &DecodeStrategy,
        ground_truth: Option<&GroundTruth>,
        train: bool,
    ) -> Result<DecodeOutput<U::State>, EncoderError> {
        let device = self.embeddings.device();

        let (batch_size, max_iterations, lengths) = match strategy {
            DecodeStrategy::TeacherForced | DecodeStrategy::ScheduledSample { .. } => {
                let ground_truth = ground_truth.ok_or_else(|| {
                    ShapeError::MalformedSource(
                        "teacher-forced decoding requires ground truth".to_string(),
                    )
                })?;
                let lengths = ground_truth.lengths.f_to_kind(Kind::Int64)?;
                let max_length = lengths.f_max()?.f_int64_value(&[])?;
                if max_length <= 0 {
                    return Err(ShapeError::MalformedSource(
                        "all sequences are empty".to_string(),
                    )
                    .into());
                }
                (lengths.size()[0], max_length, Some(lengths))
            }
            DecodeStrategy::GreedyAutoregressive {
                seed_tokens,
                max_steps,
                ..
            } => (seed_tokens.len() as i64, *max_steps, None),
        };

        let mut finished = match lengths {
            Some(ref lengths) => lengths.f_le(0)?,
            None => Tensor::f_zeros(&[batch_size], (Kind::Bool, device))?,
        };
        let mut sequence_lengths = Tensor::f_zeros(&[batch_size], (Kind::Int64, device))?;
        let mut state = self
            .unit
            .zero_state(batch_size, self.embeddings.kind(), train)?;
        let mut records = StepRecords::new(self.swap_memory);
        let mut prev_sample_ids: Option<Tensor> = None;

        let mut time = 0;
        while !all(&finished)? {
            let input_ids =
                self.next_inputs(strategy, ground_truth, time, prev_sample_ids.as_ref())?;

            let inputs = Tensor::f_embedding(self.embeddings, &input_ids, -1, false, false)?;
            let (outputs, next_state) = self.unit.step(&inputs, &state, train)?;
            let logits = self.projection.forward(&outputs)?;
            let sample_ids = logits.f_argmax(-1, false)?;

            let step_finished = match (strategy, &lengths) {
                (DecodeStrategy::GreedyAutoregressive { end_token, .. }, _) => {
                    sample_ids.f_eq(*end_token)?
                }
                (_, Some(lengths)) => lengths.f_le(time + 1)?,
                (_, None) => {
                    return Err(ShapeError::MalformedSource(
                        "teacher-forced decoding requires sequence lengths".to_string(),
                    )
                    .into())
                }
            };

            let mut next_finished = step_finished.f_logical_or(&finished)?;
            if time + 1 >= max_iterations {
                next_finished = next_finished.f_logical_or(&Tensor::f_ones(
                    &[batch_size],
                    (Kind::Bool, device),
                )?)?;
            }

            sequence_lengths = Tensor::f_full(&[batch_size], time + 1, (Kind::Int64, device))?
                .f_where_self(&finished.f_logical_not()?, &sequence_lengths)?;

            records.push(&logits, &sample_ids, &input_ids);

            state = next_state;
            finished = next_finished;
            prev_sample_ids = Some(sample_ids);
            time += 1;
        }

        let (logits, sample_ids, input_ids) = records.assemble(device, self.output_time_major)?;

        Ok(DecodeOutput {
            logits,
            sample_ids,
            input_ids,
            final_state: state,
            final_sequence_lengths: sequence_lengths,
        })
    }

    /// Get the input tokens of a time step.
    fn next_inputs(
        &self,
        strategy: &DecodeStrategy,
        ground_truth: Option<&GroundTruth>,
        time: i64,
        prev_sample_ids: Option<&Tensor>,
    ) -> Result<Tensor, EncoderError> {
        let device = self.embeddings.device();

        let ground_truth_ids = || -> Result<Tensor, EncoderError> {
            let ground_truth = ground_truth.ok_or_else(|| {
                ShapeError::MalformedSource(
                    "teacher-forced decoding requires ground truth".to_string(),
                )
            })?;
            Ok(ground_truth
                .token_ids
                .f_select(0, time)?
                .f_to_kind(Kind::Int64)?)
        };

        let input_ids = match (strategy, prev_sample_ids) {
            (DecodeStrategy::TeacherForced, _) | (DecodeStrategy::ScheduledSample { .. }, None) => {
                ground_truth_ids()?
            }
            (
                DecodeStrategy::ScheduledSample {
                    sampling_probability,
                },
                Some(prev_sample_ids),
            ) => {
                let ground_truth_ids = ground_truth_ids()?;
                let use_sample = Tensor::f_rand(&ground_truth_ids.size(), (Kind::Float, device))?
                    .f_lt(*sampling_probability)?;
                prev_sample_ids.f_where_self(&use_sample, &ground_truth_ids)?
            }
            (DecodeStrategy::GreedyAutoregressive { seed_tokens, .. }, None) => {
                Tensor::from_slice(seed_tokens).to_device(device)
            }
            (DecodeStrategy::GreedyAutoregressive { .. }, Some(prev_sample_ids)) => {
                prev_sample_ids.shallow_clone()
            }
        };

        Ok(input_ids)
    }
}

fn all(mask: &Tensor) -> Result<bool, TchError> {
    Ok(mask.f_all()?.f_int64_value(&[])? != 0)
}
