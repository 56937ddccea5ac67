use std::fs::File;

use anyhow::{Context, Result};
use awdlstm::config::{Config, EncoderConfig, Mode, TomlRead};
use awdlstm::precision::Dtype;
use awdlstm::{AwdLstmEncoder, EncoderBuilder};
use awdlstm_tch_ext::RootExt;
use log::{info, warn};
use tch::nn::VarStore;
use tch::Device;

/// An encoder with its variable store.
pub struct Model {
    pub encoder: AwdLstmEncoder,
    pub vs: VarStore,
}

impl Model {
    /// Load an encoder on the given device.
    ///
    /// `adjust_config` can modify the encoder configuration before the
    /// encoder is built. The parameters are loaded from
    /// `parameters_path` when it is given. Gradient computation is
    /// disabled for the parameters.
    pub fn load<F>(
        config_path: &str,
        parameters_path: Option<&str>,
        mode: Mode,
        device: Device,
        adjust_config: F,
    ) -> Result<Self>
    where
        F: FnOnce(&mut EncoderConfig),
    {
        let mut config = load_config(config_path)?;
        adjust_config(&mut config.encoder);

        let mut vs = VarStore::new(device);

        let encoder = EncoderBuilder::new(config.encoder, mode)
            .model_defaults(&config.model)
            .build(&vs.root_ext(|_| 0))
            .context("Cannot construct encoder")?;

        match parameters_path {
            Some(parameters_path) => {
                vs.load(parameters_path).context(format!(
                    "Cannot load encoder parameters from: {}",
                    parameters_path
                ))?;
                info!("Loaded encoder parameters from: {}", parameters_path);
            }
            None => warn!("No parameter file given, encoder parameters are random"),
        }

        if encoder.dtype() == Dtype::Float16 {
            vs.half();
        }

        vs.freeze();

        Ok(Model { encoder, vs })
    }
}

pub fn load_config(config_path: &str) -> Result<Config> {
    let config_file = File::open(config_path)
        .context(format!("Cannot open configuration file '{}'", &config_path))?;
    let config = Config::from_toml_read(config_file)
        .context(format!("Cannot parse configuration file: {}", config_path))?;

    Ok(config)
}

/// Parse a line of whitespace-separated token identifiers.
pub fn parse_token_line(line: &str, vocab_size: i64) -> Result<Vec<i64>> {
    line.split_whitespace()
        .map(|token| {
            let id: i64 = token
                .parse()
                .context(format!("Cannot parse token identifier: {}", token))?;
            if id < 0 || id >= vocab_size {
                anyhow::bail!(
                    "Token identifier {} is not in the vocabulary (size {})",
                    id,
                    vocab_size
                );
            }
            Ok(id)
        })
        .collect()
}

/// Parse a comma-separated list of token identifiers.
pub fn parse_token_list(list: &str) -> Result<Vec<i64>> {
    list.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse()
                .context(format!("Cannot parse token identifier: {}", token))
        })
        .collect()
}
