// src/lambda/mod.rs

//! AWS Lambda handler for the engine.
//!
//! The external periodic trigger invokes this function with an empty
//! payload (or `{"action": "sweep"}`) to run the expiration sweep. Chat
//! webhooks forward already-parsed events as
//! `{"action": "chat_event", "username": ..., "text": ..., "full_name": ...}`.

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::{DEFAULT_CONFIG_PATH, load_config, open_store};
use crate::error::Result;
use crate::models::SweepReport;
use crate::pipeline::{ChatEvent, Engine, RouteOutcome};

/// What the invocation asks for.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Sweep,
    ChatEvent,
}

/// Lambda invocation payload.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub action: Action,

    /// Event fields, only read for `chat_event`
    #[serde(flatten)]
    pub event: ChatEvent,
}

/// Lambda response payload.
#[derive(Debug, Serialize)]
pub struct Response {
    pub success: bool,
    pub action: Action,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SweepReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RouteOutcome>,

    /// Error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl Response {
    fn new(action: Action) -> Self {
        Self {
            success: false,
            action,
            report: None,
            outcome: None,
            error: None,
            error_code: None,
            execution_time_ms: 0,
        }
    }
}

/// Build the engine from `CONFIG_PATH` (or the default path) and the environment.
pub fn build_engine() -> Result<Engine> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(std::path::Path::new(&path))?;
    info!(
        "Engine configured: crm={}, store={}",
        config.crm.base_url, config.storage.root_dir
    );
    Engine::new(&config, open_store(&config))
}

/// Main Lambda handler function.
#[instrument(skip(engine, event), fields(action = tracing::field::Empty))]
pub async fn handler(
    engine: &Engine,
    event: LambdaEvent<Request>,
) -> std::result::Result<Response, LambdaError> {
    let start = std::time::Instant::now();
    let (request, _context) = event.into_parts();
    tracing::Span::current().record("action", tracing::field::debug(request.action));

    let mut response = Response::new(request.action);
    match request.action {
        Action::Sweep => {
            let report = engine.sweep.run().await;
            info!(
                "Sweep done: {} campaigns, {} moved, {} errors",
                report.campaigns_checked,
                report.total_cards_moved,
                report.errors.len()
            );
            response.success = true;
            response.report = Some(report);
        }
        Action::ChatEvent => match engine.router.handle(&request.event).await {
            Ok(outcome) => {
                info!("Chat event routed: {:?}", outcome);
                response.success = true;
                response.outcome = Some(outcome);
            }
            Err(e) => {
                error!("Chat event routing failed: {}", e);
                response.error_code = Some(e.code().to_string());
                response.error = Some(e.to_string());
            }
        },
    }

    response.execution_time_ms = start.elapsed().as_millis() as u64;
    Ok(response)
}
