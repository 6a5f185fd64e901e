#[macro_use]
extern crate log;

use gosling::prelude::*;
use gumdrop::Options;
use std::process;

#[tokio::main]
async fn main() {
    let configuration = GoslingConfiguration::parse_args_default_or_exit();
    if configuration.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }
    configuration.initialize_logger();

    match run(&configuration).await {
        Ok(batch) => {
            // Misconfigured and failed targets are reported, but still fail the run.
            if batch.skipped() + batch.failed() > 0 {
                process::exit(1);
            }
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

async fn run(configuration: &GoslingConfiguration) -> Result<BatchReport, GoslingError> {
    configuration.validate()?;
    let document = ScenarioDocument::from_file(&configuration.file)?;
    ScenarioRunner::from_configuration(configuration)?
        .run_all(&document.scenes, &document.global_headers)
        .await
}
