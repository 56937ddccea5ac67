use std::io::stdout;

use anyhow::Result;
use clap::{crate_version, value_parser, Arg, Command};
use clap_complete::{generate, Shell};

pub mod io;

mod subcommands;

pub mod traits;
use traits::AwdLstmApp;

fn main() -> Result<()> {
    // Known subapplications.
    let apps = vec![
        subcommands::GenerateApp::app(),
        subcommands::ScoreApp::app(),
    ];

    env_logger::init();

    let cli = Command::new("awdlstm")
        .about("AWD-LSTM language model encoder")
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommands(apps)
        .subcommand(
            Command::new("completions")
                .about("Generate completion scripts for your shell")
                .arg_required_else_help(true)
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        );
    let matches = cli.clone().get_matches();

    match matches.subcommand() {
        Some(("completions", matches)) => {
            let shell = *matches.get_one::<Shell>("shell").unwrap();
            write_completion_script(cli, shell);
            Ok(())
        }
        Some(("generate", matches)) => subcommands::GenerateApp::parse(matches)?.run(),
        Some(("score", matches)) => subcommands::ScoreApp::parse(matches)?.run(),
        _unknown => unreachable!(),
    }
}

fn write_completion_script(mut cli: Command, shell: Shell) {
    generate(shell, &mut cli, "awdlstm", &mut stdout());
}
