//! AWS Lambda entry point for the campaign engine
//!
//! Deploy with `cargo lambda build --release --features lambda`.
//! Point `STORAGE_ROOT` at a persistent mount (EFS) so campaign state
//! survives between invocations. Concurrent invocations on the same mount
//! coordinate through the store's per-key lease files.

use std::sync::Arc;

use campaign_sync::lambda::{build_engine, handler};
use lambda_runtime::{Error as LambdaError, service_fn};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Campaign sync Lambda starting...");
    let engine = Arc::new(build_engine()?);

    lambda_runtime::run(service_fn(move |event| {
        let engine = Arc::clone(&engine);
        async move { handler(&engine, event).await }
    }))
    .await
}
