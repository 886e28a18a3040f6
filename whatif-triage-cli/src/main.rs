use clap::Parser;
use tracing_subscriber::EnvFilter;
use whatif_triage_core::{execute_what_if_flow, style, CoreCliArgs};

fn main() {
    let cli_args = CoreCliArgs::parse();

    // report output goes to stdout; all diagnostics stay on stderr
    let default_level = if cli_args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute_what_if_flow(cli_args) {
        eprintln!(
            "{} {} {:#}",
            style("❌"),
            style("whatif-triage failed:").red().bold(),
            style(e).red()
        );
        std::process::exit(1);
    }
}
