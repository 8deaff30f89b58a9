use std::path::PathBuf;

use tenantgate_core::LoaderConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod error;
mod scenario;

use scenario::Scenario;

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TENANTGATE_SCENARIO").ok())
        .map(PathBuf::from);
    let Some(path) = path else {
        eprintln!("usage: tenantgate-sim <scenario.toml>");
        std::process::exit(2);
    };

    let config = LoaderConfig::from_env();
    tracing::info!(
        scenario = %path.display(),
        option_key = %config.option_key,
        "running scenario"
    );

    let report = match Scenario::from_path(&path) {
        Ok(scenario) => scenario.run(config),
        Err(e) => {
            tracing::error!("scenario failed: {e}");
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("failed to encode report: {e}");
            std::process::exit(1);
        }
    }
}
