use std::convert::TryFrom;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use awdlstm::config::Mode;
use awdlstm::EncoderInput;
use clap::{Arg, ArgMatches, Command};
use itertools::Itertools;
use stdinout::Output;
use tch::{self, Device};

use crate::io::{parse_token_list, Model};
use crate::traits::AwdLstmApp;

const CONFIG: &str = "CONFIG";
const GPU: &str = "GPU";
const MAX_TOKENS: &str = "MAX_TOKENS";
const OUTPUT: &str = "OUTPUT";
const PARAMETERS: &str = "PARAMETERS";
const SEED_TOKENS: &str = "SEED_TOKENS";

pub struct GenerateApp {
    config: String,
    device: Device,
    max_tokens: Option<i64>,
    output: Option<String>,
    parameters: Option<String>,
    seed_tokens: Option<Vec<i64>>,
}

impl AwdLstmApp for GenerateApp {
    fn app() -> Command {
        Command::new("generate")
            .arg_required_else_help(true)
            .about("Generate sequences from seed tokens")
            .arg(
                Arg::new(CONFIG)
                    .help("Encoder configuration file")
                    .index(1)
                    .required(true),
            )
            .arg(Arg::new(OUTPUT).help("Output file").index(2).num_args(1))
            .arg(
                Arg::new(GPU)
                    .long("gpu")
                    .num_args(1)
                    .help("Use the GPU with the given identifier"),
            )
            .arg(
                Arg::new(MAX_TOKENS)
                    .long("max-tokens")
                    .value_name("N")
                    .num_args(1)
                    .help("Generate at most N tokens per sequence"),
            )
            .arg(
                Arg::new(PARAMETERS)
                    .long("parameters")
                    .value_name("FILE")
                    .num_args(1)
                    .help("Encoder parameters"),
            )
            .arg(
                Arg::new(SEED_TOKENS)
                    .long("seed-tokens")
                    .value_name("IDS")
                    .num_args(1)
                    .help("Comma-separated seed token identifiers, one per sequence"),
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
        let max_tokens = matches
            .get_one::<String>(MAX_TOKENS)
            .map(|v| v.parse().context("Cannot parse maximum number of tokens"))
            .transpose()?;
        let output = matches.get_one::<String>(OUTPUT).map(ToOwned::to_owned);
        let parameters = matches.get_one::<String>(PARAMETERS).map(ToOwned::to_owned);
        let seed_tokens = matches
            .get_one::<String>(SEED_TOKENS)
            .map(|v| parse_token_list(v))
            .transpose()?;

        Ok(GenerateApp {
            config,
            device,
            max_tokens,
            output,
            parameters,
            seed_tokens,
        })
    }

    fn run(&self) -> Result<()> {
        let model = Model::load(
            &self.config,
            self.parameters.as_deref(),
            Mode::Infer,
            self.device,
            |config| {
                if let Some(ref seed_tokens) = self.seed_tokens {
                    config.seed_tokens = Some(seed_tokens.clone());
                }
                if let Some(max_tokens) = self.max_tokens {
                    config.num_tokens_gen = Some(max_tokens);
                }
            },
        )?;

        let output = tch::no_grad(|| model.encoder.encode(&EncoderInput::default()))
            .context("Cannot generate sequences")?;

        let generated = if model.encoder.config().time_major {
            output.outputs.f_transpose(0, 1)?
        } else {
            output.outputs
        };
        let generated = generated.to_device(Device::Cpu);
        let lengths = Vec::<i64>::try_from(&output.final_sequence_lengths.to_device(Device::Cpu))?;

        let output = Output::from(self.output.as_ref());
        let mut writer = BufWriter::new(output.write().context("Cannot open output for writing")?);

        for (idx, &length) in lengths.iter().enumerate() {
            let tokens = Vec::<i64>::try_from(
                &generated
                    .f_select(0, idx as i64)?
                    .f_narrow(0, 0, length)?,
            )?;
            writeln!(writer, "{}", tokens.iter().join(" "))
                .context("Cannot write generated sequence")?;
        }

        Ok(())
    }
}
