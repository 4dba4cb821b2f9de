use clap::{command, value_parser, Arg, ArgAction};
use erdp::ErrorDisplay;
use rfc4938d::config::Config;
use rfc4938d::supervisor::Supervisor;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "/etc/rfc4938.conf";

fn main() -> ExitCode {
    // Parse arguments.
    let args = command!()
        .arg(
            Arg::new("config")
                .short('f')
                .long("config")
                .help("Override the default config file path")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log at trace level regardless of DEBUG_LEVEL")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let path = args
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = match Config::load(&path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!(
                "Failed to read config file {}: {}.",
                path.display(),
                e.display()
            );

            return ExitCode::FAILURE;
        }
    };

    let level = if args.get_flag("verbose") {
        log::LevelFilter::Trace
    } else {
        config.log_level()
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Failed to start runtime: {}.", e.display());

            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let supervisor = match Supervisor::start(config).await {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Failed to start supervisor: {}.", e.display());

                return ExitCode::FAILURE;
            }
        };

        match supervisor.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Supervisor failed: {}.", e.display());

                ExitCode::FAILURE
            }
        }
    })
}
