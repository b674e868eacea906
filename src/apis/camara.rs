use super::{Deputy, LegislatureApi, RawExpenseData};
use crate::config::ApiConfig;
use crate::error::{PipelineError, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://dadosabertos.camara.leg.br/api/v2";

pub const CAMARA_API: &str = "camara";

/// Client for the Chamber of Deputies open-data API.
pub struct CamaraApiClient {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    retry_attempts: u32,
    retry_backoff_ms: u64,
    max_expense_pages: u32,
}

impl CamaraApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            retry_attempts: config.retry_attempts,
            retry_backoff_ms: config.retry_backoff_ms,
            max_expense_pages: config.max_expense_pages,
        }
    }

    /// GET a JSON document, applying the configured retry policy. The delay
    /// doubles after each failed attempt.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut attempt = 0;
        let mut backoff = self.retry_backoff_ms;
        loop {
            match self.try_get_json(url, query).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    warn!(
                        "Request to {} failed (attempt {}/{}), retrying in {}ms: {}",
                        url,
                        attempt,
                        self.retry_attempts + 1,
                        backoff,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Api {
                message: format!("{} returned HTTP {}", url, status),
            });
        }
        Ok(resp.json().await?)
    }
}

/// The `dados` array of a response, or `None` when the payload has no usable
/// one. Error bodies from this API carry no `dados` key.
fn dados_array(body: &Value) -> Option<&Vec<Value>> {
    body.get("dados").and_then(|d| d.as_array())
}

/// Whether the response advertises another page via its HATEOAS links.
fn has_next_page(body: &Value) -> bool {
    body.get("links")
        .and_then(|l| l.as_array())
        .map(|links| {
            links
                .iter()
                .any(|link| link.get("rel").and_then(|r| r.as_str()) == Some("next"))
        })
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl LegislatureApi for CamaraApiClient {
    fn api_name(&self) -> &'static str {
        CAMARA_API
    }

    #[instrument(skip(self))]
    async fn list_deputies(&self) -> Result<Vec<Deputy>> {
        let url = format!("{}/deputados", self.base_url);
        let body = self
            .get_json(&url, &[("itens", self.page_size.to_string())])
            .await?;

        let Some(items) = dados_array(&body) else {
            warn!("Deputy listing response carried no dados array");
            return Ok(Vec::new());
        };

        let mut deputies = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Deputy>(item.clone()) {
                Ok(deputy) => deputies.push(deputy),
                Err(e) => debug!("Skipping malformed deputy entry: {}", e),
            }
        }
        debug!("Fetched {} deputies from listing", deputies.len());
        Ok(deputies)
    }

    #[instrument(skip(self))]
    async fn deputy_state(&self, deputy_id: i64) -> Result<Option<String>> {
        let url = format!("{}/deputados/{}", self.base_url, deputy_id);
        let body = self.get_json(&url, &[]).await?;

        // The detail payload nests the current state under ultimoStatus; a
        // top-level siglaUf is accepted as fallback.
        let state = body
            .get("dados")
            .and_then(|d| {
                d.get("ultimoStatus")
                    .and_then(|s| s.get("siglaUf"))
                    .or_else(|| d.get("siglaUf"))
            })
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(state)
    }

    #[instrument(skip(self))]
    async fn monthly_expenses(
        &self,
        deputy_id: i64,
        year: i32,
        month: u32,
    ) -> Result<Vec<RawExpenseData>> {
        let url = format!("{}/deputados/{}/despesas", self.base_url, deputy_id);
        let mut expenses = Vec::new();
        let mut page: u32 = 1;

        loop {
            let body = self
                .get_json(
                    &url,
                    &[
                        ("ano", year.to_string()),
                        ("mes", month.to_string()),
                        ("itens", self.page_size.to_string()),
                        ("pagina", page.to_string()),
                    ],
                )
                .await?;

            let Some(items) = dados_array(&body) else {
                debug!(
                    "Expense response for deputy {} {}-{:02} page {} carried no dados array",
                    deputy_id, year, month, page
                );
                break;
            };
            if items.is_empty() {
                break;
            }
            expenses.extend(items.iter().cloned());

            if !has_next_page(&body) {
                break;
            }
            if page >= self.max_expense_pages {
                warn!(
                    "Stopping expense pagination for deputy {} {}-{:02} at page cap {}",
                    deputy_id, year, month, self.max_expense_pages
                );
                break;
            }
            page += 1;
        }

        Ok(expenses)
    }
}
