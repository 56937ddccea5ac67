use std::convert::TryFrom;
use std::io::{BufRead, BufWriter, Write};

use anyhow::{Context, Result};
use awdlstm::config::Mode;
use awdlstm::{AwdLstmEncoder, EncoderInput, SourceTensors};
use clap::{Arg, ArgMatches, Command};
use log::{info, warn};
use stdinout::{Input, Output};
use tch::{self, Device, Kind, Tensor};

use crate::io::{parse_token_line, Model};
use crate::traits::AwdLstmApp;

const CONFIG: &str = "CONFIG";
const GPU: &str = "GPU";
const INPUT: &str = "INPUT";
const OUTPUT: &str = "OUTPUT";
const PARAMETERS: &str = "PARAMETERS";

pub struct ScoreApp {
    config: String,
    device: Device,
    input: Option<String>,
    output: Option<String>,
    parameters: Option<String>,
}

/// A batch of sequences split into inputs and next-token targets.
///
/// `inputs` and `targets` are row-major `[batch_size, max_len]`
/// matrices padded with zeros. Sequences with fewer than two tokens,
/// and padding rows beyond the given sequences, have length zero.
#[derive(Debug, Eq, PartialEq)]
struct ShiftedBatch {
    inputs: Vec<i64>,
    targets: Vec<i64>,
    lengths: Vec<i64>,
    max_len: i64,
}

impl ShiftedBatch {
    fn new(sequences: &[Vec<i64>], batch_size: usize) -> Self {
        // The inputs are all tokens but the last, the targets all
        // tokens but the first.
        let lengths = (0..batch_size)
            .map(|idx| match sequences.get(idx) {
                Some(sequence) if sequence.len() > 1 => sequence.len() as i64 - 1,
                _ => 0,
            })
            .collect::<Vec<_>>();
        let max_len = lengths.iter().copied().max().unwrap_or(0);

        let mut inputs = vec![0i64; batch_size * max_len as usize];
        let mut targets = vec![0i64; batch_size * max_len as usize];
        for (idx, sequence) in sequences.iter().take(batch_size).enumerate() {
            let offset = idx * max_len as usize;
            let len = lengths[idx] as usize;
            if len == 0 {
                continue;
            }
            inputs[offset..offset + len].copy_from_slice(&sequence[..len]);
            targets[offset..offset + len].copy_from_slice(&sequence[1..]);
        }

        ShiftedBatch {
            inputs,
            targets,
            lengths,
            max_len,
        }
    }
}

/// Perplexities from per-token negative log-likelihoods.
///
/// `nll` has shape `[batch_size, max_len]`. Only the first `lengths[i]`
/// positions of row *i* are used. Returns `None` for rows of length zero.
fn masked_perplexities(nll: &Tensor, lengths: &[i64]) -> Result<Vec<Option<f64>>> {
    let device = nll.device();
    let max_len = nll.size()[1];
    let length_tensor = Tensor::from_slice(lengths).to_device(device);

    let mask = Tensor::f_arange(max_len, (Kind::Int64, device))?
        .f_unsqueeze(0)?
        .f_lt_tensor(&length_tensor.f_unsqueeze(-1)?)?;
    let nll_sums = nll
        .f_mul(&mask.f_to_kind(Kind::Float)?)?
        .f_sum_dim_intlist(&[-1i64][..], false, Kind::Float)?
        .to_device(Device::Cpu);
    let nll_sums = Vec::<f32>::try_from(&nll_sums)?;

    Ok(lengths
        .iter()
        .zip(nll_sums)
        .map(|(&len, nll_sum)| match len {
            0 => None,
            len => Some((nll_sum as f64 / len as f64).exp()),
        })
        .collect())
}

impl ScoreApp {
    /// Compute the next-token perplexities of a batch of sequences.
    ///
    /// Returns `None` for sequences with fewer than two tokens.
    fn score_batch(
        &self,
        encoder: &AwdLstmEncoder,
        sequences: &[Vec<i64>],
    ) -> Result<Vec<Option<f64>>> {
        let batch_size = encoder.batch_size();
        let batch = ShiftedBatch::new(sequences, batch_size as usize);
        if batch.max_len == 0 {
            return Ok(vec![None; sequences.len()]);
        }

        let inputs = Tensor::from_slice(&batch.inputs)
            .f_view([batch_size, batch.max_len])?
            .to_device(self.device);
        let targets = Tensor::from_slice(&batch.targets)
            .f_view([batch_size, batch.max_len])?
            .to_device(self.device);
        let length_tensor = Tensor::from_slice(&batch.lengths).to_device(self.device);

        let (inputs, time_major) = if encoder.config().time_major {
            (inputs.f_transpose(0, 1)?, true)
        } else {
            (inputs, false)
        };

        let output = tch::no_grad(|| {
            encoder.encode(&EncoderInput {
                source_tensors: Some(SourceTensors {
                    token_ids: &inputs,
                    lengths: &length_tensor,
                }),
                seed_tokens: None,
            })
        })
        .context("Cannot encode batch")?;

        let logits = if time_major {
            output.logits.f_transpose(0, 1)?
        } else {
            output.logits
        };

        // Negative log-likelihood of the targets, [batch_size, max_len].
        let nll = logits
            .f_log_softmax(-1, Kind::Float)?
            .f_gather(-1, &targets.f_unsqueeze(-1)?, false)?
            .f_squeeze_dim(-1)?
            .f_neg()?;

        let mut perplexities = masked_perplexities(&nll, &batch.lengths)?;
        perplexities.truncate(sequences.len());

        Ok(perplexities)
    }
}

impl AwdLstmApp for ScoreApp {
    fn app() -> Command {
        Command::new("score")
            .arg_required_else_help(true)
            .about("Compute the perplexity of token sequences")
            .arg(
                Arg::new(CONFIG)
                    .help("Encoder configuration file")
                    .index(1)
                    .required(true),
            )
            .arg(Arg::new(INPUT).help("Input sequences").index(2))
            .arg(Arg::new(OUTPUT).help("Output perplexities").index(3).num_args(1))
            .arg(
                Arg::new(GPU)
                    .long("gpu")
                    .num_args(1)
                    .help("Use the GPU with the given identifier"),
            )
            .arg(
                Arg::new(PARAMETERS)
                    .long("parameters")
                    .value_name("FILE")
                    .num_args(1)
                    .help("Encoder parameters"),
            )
    }

    fn parse(matches: &ArgMatches) -> Result<Self> {
        let config = matches.get_one::<String>(CONFIG).unwrap().into();
        let device = match matches.get_one::<String>(GPU) {
            Some(gpu) => Device::Cuda(
                gpu.parse()
                    .context(format!("Cannot parse GPU number ({})", gpu))?,
            ),
            None => Device::Cpu,
        };
        let input = matches.get_one::<String>(INPUT).map(ToOwned::to_owned);
        let output = matches.get_one::<String>(OUTPUT).map(ToOwned::to_owned);
        let parameters = matches.get_one::<String>(PARAMETERS).map(ToOwned::to_owned);

        Ok(ScoreApp {
            config,
            device,
            input,
            output,
            parameters,
        })
    }

    fn run(&self) -> Result<()> {
        let model = Model::load(
            &self.config,
            self.parameters.as_deref(),
            Mode::Eval,
            self.device,
            |_| {},
        )?;
        let encoder = &model.encoder;
        let batch_size = encoder.batch_size() as usize;
        let vocab_size = encoder.config().vocab_size;

        let input = Input::from(self.input.as_ref());
        let reader = input.buf_read().context("Cannot open input for reading")?;

        let output = Output::from(self.output.as_ref());
        let mut writer = BufWriter::new(output.write().context("Cannot open output for writing")?);

        let mut n_sequences = 0;
        let mut batch = Vec::with_capacity(batch_size);
        let mut lines = reader.lines().enumerate().peekable();
        while let Some((line_idx, line)) = lines.next() {
            let line = line.context("Cannot read line")?;
            let sequence = parse_token_line(&line, vocab_size)
                .context(format!("Invalid sequence on line {}", line_idx + 1))?;
            if sequence.len() < 2 {
                warn!(
                    "Sequence on line {} has fewer than two tokens, cannot be scored",
                    line_idx + 1
                );
            }
            batch.push(sequence);

            if batch.len() == batch_size || lines.peek().is_none() {
                for perplexity in self.score_batch(encoder, &batch)? {
                    let written = match perplexity {
                        Some(perplexity) => writeln!(writer, "{:.4}", perplexity),
                        None => writeln!(writer, "NaN"),
                    };
                    written.context("Cannot write perplexity")?;
                }

                n_sequences += batch.len();
                batch.clear();
            }
        }

        info!("Scored {} sequences", n_sequences);

        Ok(())
    }
}
