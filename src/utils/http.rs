// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::CrmConfig;

/// Create a configured asynchronous HTTP client for the CRM.
pub fn create_async_client(config: &CrmConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Some(token) = config.api_token.as_deref().filter(|t| !t.trim().is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| AppError::config(format!("crm.api_token is not a valid header: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .default_headers(headers)
        .build()?;
    Ok(client)
}
