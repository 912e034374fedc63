mod cli;
mod commands;
mod error;
mod output;
mod runtime;
mod surface;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;
use crate::output::Printer;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Logs go to stderr; stdout carries command results.
fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let printer = Printer::new(cli.global.output);
    match cli.command {
        // Config commands don't need a companion
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global, printer),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "hacompanion", &mut std::io::stdout());
            Ok(())
        }

        // Pure payload inspection
        Command::Present { payload } => commands::trigger::present(&payload, printer).await,

        Command::Run(args) => {
            let rt = runtime::build(&cli.global, !args.stdin)?;
            let result = commands::run::handle(&rt, &args, printer).await;
            rt.report_dry_run();
            result
        }

        Command::Trigger(cmd) => {
            let rt = runtime::build(&cli.global, true)?;
            tracing::debug!(command = ?cmd, "dispatching trigger");
            let result = commands::trigger::dispatch(cmd, &rt, printer).await;
            rt.report_dry_run();
            result
        }
    }
}
