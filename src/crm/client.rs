// src/crm/client.rs

//! Thin HTTP client for the CRM card endpoints.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::crm::pagination::PaginationStyle;
use crate::error::{AppError, Result};
use crate::models::{Card, CrmConfig, StagePair};
use crate::utils::http::create_async_client;
use crate::utils::join_endpoint;

/// Outcome of a stage transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The CRM accepted the new stage (including a no-op move).
    Moved,
    /// The card no longer exists.
    Missing,
}

#[derive(Debug, Deserialize)]
struct ListingEnvelope {
    #[serde(default)]
    data: Option<Value>,
}

/// Card listing and update calls.
#[derive(Clone)]
pub struct CrmClient {
    http: Client,
    cards_url: Url,
}

impl CrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self> {
        Ok(Self {
            http: create_async_client(config)?,
            cards_url: join_endpoint(&config.base_url, &config.cards_path)?,
        })
    }

    pub fn cards_url(&self) -> &str {
        self.cards_url.as_str()
    }

    /// Fetch one listing page.
    ///
    /// `Ok(None)` means the response had no `data` array, which is how a CRM
    /// speaking the other convention answers.
    pub async fn fetch_page(
        &self,
        style: PaginationStyle,
        page: u32,
        page_size: u32,
    ) -> Result<Option<Vec<Card>>> {
        let response = self
            .http
            .get(self.cards_url.clone())
            .query(&style.query(page, page_size))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::crm(
                self.cards_url(),
                Some(status.as_u16()),
                format!("listing page {page} ({style}) failed"),
            ));
        }

        let body = response.text().await?;
        let envelope: ListingEnvelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("Listing page {} ({}) is not a JSON object: {}", page, style, e);
                return Ok(None);
            }
        };
        let Some(Value::Array(items)) = envelope.data else {
            return Ok(None);
        };

        let mut cards = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Card>(item) {
                Ok(card) => cards.push(card),
                Err(e) => log::debug!("Skipping malformed card on page {}: {}", page, e),
            }
        }
        Ok(Some(cards))
    }

    /// Overwrite a card's pipeline and status.
    pub async fn update_stage(&self, card_id: &str, target: &StagePair) -> Result<MoveOutcome> {
        let url = join_endpoint(self.cards_url.as_str(), card_id)?;
        let response = self
            .http
            .patch(url.clone())
            .json(&json!({
                "pipeline_id": target.pipeline_id,
                "status_id": target.status_id,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(MoveOutcome::Missing);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(AppError::crm(
                url.as_str(),
                Some(status.as_u16()),
                format!("move to {target} rejected: {snippet}"),
            ));
        }
        Ok(MoveOutcome::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CrmClient {
        CrmClient::new(&CrmConfig {
            base_url: server.uri(),
            ..CrmConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page_parses_cards() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": 1, "title": "Chat with Ana", "pipeline_id": 1, "status_id": 10},
                    {"title": "no id"},
                ]
            })))
            .mount(&server)
            .await;

        let cards = client(&server)
            .fetch_page(PaginationStyle::LaravelStyle, 1, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, "1");
    }

    #[tokio::test]
    async fn test_fetch_page_without_data_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"items": []}})))
            .mount(&server)
            .await;

        let page = client(&server)
            .fetch_page(PaginationStyle::LaravelStyle, 1, 50)
            .await
            .unwrap();
        assert!(page.is_none());
    }

    #[tokio::test]
    async fn test_fetch_page_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_page(PaginationStyle::JsonApiStyle, 1, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Crm { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn test_update_stage() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/cards/7"))
            .and(body_json(json!({"pipeline_id": "2", "status_id": "20"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": 7}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/cards/8"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/cards/9"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid status"))
            .mount(&server)
            .await;

        let client = client(&server);
        let target = StagePair::new("2", "20");
        assert_eq!(client.update_stage("7", &target).await.unwrap(), MoveOutcome::Moved);
        assert_eq!(client.update_stage("8", &target).await.unwrap(), MoveOutcome::Missing);

        let err = client.update_stage("9", &target).await.unwrap_err();
        match err {
            AppError::Crm { status, message, .. } => {
                assert_eq!(status, Some(422));
                assert!(message.contains("invalid status"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
