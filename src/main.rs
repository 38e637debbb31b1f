use std::sync::Arc;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use tollgate::authz::registry::PointRegistry;
use tollgate::authz::types::PointSummary;
use tollgate::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "tollgate",
    version,
    about = "Authorization policy decision service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Load and validate the policies, print the declared points and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let registry = PointRegistry::load_dir(&settings.policies.dir)?;

    if cli.check {
        let points: Vec<PointSummary> = registry
            .points()
            .map(|p| PointSummary::from(p.definition()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&points).into_diagnostic()?);
        return Ok(());
    }

    tollgate::web::serve(&settings, Arc::new(registry)).await?;
    Ok(())
}
