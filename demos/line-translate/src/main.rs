//! Translate stdin line by line through a [`TranslationService`] and print
//! the result to stdout.
//!
//! Configuration comes from a JSON file given as the first argument, or from
//! the `FERRY_*` environment variables (a `.env` file is honoured).

mod lexicon;

use std::process::ExitCode;

use ferry::vocab::PlainVocabLoader;
use ferry::{ConfigError, ServiceConfig, TranslationService};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::lexicon::LexiconPipeline;

fn load_config() -> Result<ServiceConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => ServiceConfig::from_json_file(path),
        None => ServiceConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "line_translate=info,ferry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let service = TranslationService::new(config, PlainVocabLoader, LexiconPipeline::build);
    if let Err(err) = service.start() {
        error!(error = %err, "failed to start translation service");
        return ExitCode::FAILURE;
    }
    info!(devices = service.config().devices.len(), "reading stdin");

    let mut input = String::new();
    if let Err(err) = tokio::io::stdin().read_to_string(&mut input).await {
        error!(error = %err, "failed to read stdin");
        service.stop().await;
        return ExitCode::FAILURE;
    }

    let status = match service.translate(&input).await {
        Ok(output) => {
            let mut stdout = tokio::io::stdout();
            match stdout.write_all(output.as_bytes()).await {
                Ok(()) => {
                    let _ = stdout.flush().await;
                    info!(lines = input.lines().count(), "done");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    error!(error = %err, "failed to write stdout");
                    ExitCode::FAILURE
                }
            }
        }
        Err(err) => {
            error!(error = %err, "translation failed");
            ExitCode::FAILURE
        }
    };

    service.stop().await;
    status
}
