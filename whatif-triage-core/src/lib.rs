// whatif-triage-core/src/lib.rs

// declare modules
pub mod analysis;
pub mod azure;
pub mod display;
pub mod patterns;

// re-export key structs/functions for external use by other crates
pub use anyhow::{Context, Result};
pub use clap::Parser;
pub use console::style;

pub use crate::analysis::{
    build_output, extract_resource_changes, format_text_output, AnalysisOutput, SourceFileCache,
};
pub use crate::display::DisplayConfig;
pub use crate::patterns::PatternStore;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// output format for the analysis report
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

// argument parsing struct - shared by the CLI crate
#[derive(Parser, Debug, Clone)]
#[command(
    name = "whatif-triage",
    about = "run an Azure deployment what-if and triage the resulting property changes"
)]
pub struct CoreCliArgs {
    /// bicep template file (defaults to ./infra/main.bicep for azd projects, ./main.bicep otherwise)
    #[arg(short, long)]
    pub template: Option<String>,

    /// azure region for the deployment scope
    #[arg(short, long)]
    pub location: Option<String>,

    /// subscription id (defaults to AZURE_SUBSCRIPTION_ID from the azd environment)
    #[arg(short, long)]
    pub subscription: Option<String>,

    /// disable azd project auto-detection
    #[arg(long)]
    pub no_azd: bool,

    /// deployment parameter as a KEY VALUE pair (repeatable)
    #[arg(short = 'p', long = "parameter", num_args = 2, value_names = ["KEY", "VALUE"], action = clap::ArgAction::Append)]
    pub parameter: Vec<String>,

    /// directory scanned for bicep source definitions
    #[arg(short = 'b', long, default_value = "./infra")]
    pub bicep_dir: String,

    /// output format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// noise-pattern rules file
    #[arg(long, default_value = "patterns/noise_patterns.json")]
    pub patterns_file: String,

    /// display configuration file
    #[arg(long, default_value = "patterns/display_config.json")]
    pub display_config: String,

    /// verbose diagnostics on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

// the end-to-end run: resolve inputs, call az, analyse, report, persist stats
pub fn execute_what_if_flow(args: CoreCliArgs) -> Result<()> {
    // azd project detection fills in template/location/subscription defaults
    let (is_azd, azd_values) = if args.no_azd {
        (false, BTreeMap::new())
    } else {
        azure::detect_azd_project()
    };

    let mut parameters: BTreeMap<String, String> = BTreeMap::new();
    let mut template = args.template.clone();
    let mut location = args.location.clone();
    let mut subscription = args.subscription.clone();

    if is_azd {
        template = template.or_else(|| Some("./infra/main.bicep".to_string()));
        location = location
            .or_else(|| azd_values.get("AZURE_LOCATION").cloned())
            .filter(|v| !v.is_empty());
        subscription = subscription
            .or_else(|| azd_values.get("AZURE_SUBSCRIPTION_ID").cloned())
            .filter(|v| !v.is_empty());

        if let Some(env_name) = azd_values.get("AZURE_ENV_NAME") {
            parameters.insert("environment".to_string(), env_name.clone());
        }
        if let Some(azd_location) = azd_values.get("AZURE_LOCATION") {
            parameters.insert("location".to_string(), azd_location.clone());
        }
    } else {
        template = template.or_else(|| Some("./main.bicep".to_string()));
    }

    // repeated --parameter KEY VALUE pairs arrive as a flat list
    for pair in args.parameter.chunks(2) {
        if let [key, value] = pair {
            parameters.insert(key.clone(), value.clone());
        }
    }

    let template = template.filter(|t| !t.is_empty()).context("--template is required")?;
    let location = location.filter(|l| !l.is_empty()).context("--location is required")?;
    if !Path::new(&template).exists() {
        anyhow::bail!("template file not found: {template}");
    }

    let store = PatternStore::load(Path::new(&args.patterns_file));
    let display = DisplayConfig::load(Path::new(&args.display_config));

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["☁ ⠋", "☁ ⠙", "☁ ⠹", "☁ ⠸", "☁ ⠼", "☁ ⠴", "☁ ⠦", "☁ ⠧", "☁ ⠇", "☁ ⠏"])
            .template("{spinner} running az what-if...")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let what_if = azure::run_what_if(&template, &location, subscription.as_deref(), &parameters)
        .context("what-if invocation failed")?;

    spinner.finish_and_clear();

    let mut cache = SourceFileCache::default();
    let changes = extract_resource_changes(&store, &mut cache, &what_if, Path::new(&args.bicep_dir));
    let output = build_output(changes, &template, &location, &args.bicep_dir);

    match args.format {
        OutputFormat::Text => println!("{}", format_text_output(&output, &display)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&output).context("failed to serialize analysis output")?
        ),
    }

    store.save_stats();

    // nudge towards pruning rules that have stopped earning their keep
    let stale = store.unused_patterns(30);
    if !stale.is_empty() {
        eprintln!(
            "{}",
            style("stale noise patterns (no match in 30+ days):").yellow().bold()
        );
        for item in stale.iter().take(5) {
            eprintln!(
                "  {} {}: {} (last matched {} days ago)",
                style("•").yellow(),
                item.category,
                item.pattern,
                item.days_since_last_match
            );
        }
        if stale.len() > 5 {
            eprintln!("  ... and {} more", stale.len() - 5);
        }
    }

    Ok(())
}
