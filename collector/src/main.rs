use clap::{Args, Parser};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod service;
mod telemetry;

#[derive(Parser)]
#[command(name = "collector", about = "Collector ingestion service")]
enum CliCommand {
    /// Run the porters described by the config file
    Run(ConfigArgs),
    /// Parse and validate a config file, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::CheckConfig(args) => match Config::load(&args.config) {
            Ok(config) => {
                println!("config ok: {} porter(s)", config.porters.len());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {e}", args.config.display());
                ExitCode::FAILURE
            }
        },
        CliCommand::Run(args) => {
            let config = match Config::load(&args.config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}: {e}", args.config.display());
                    return ExitCode::FAILURE;
                }
            };
            let _sentry = telemetry::init(&config);

            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start runtime");
                    return ExitCode::FAILURE;
                }
            };

            match runtime.block_on(service::run(config)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "collector failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
