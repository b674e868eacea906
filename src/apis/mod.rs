use crate::error::Result;
use serde::{Deserialize, Serialize};

pub mod camara;

/// Raw expense data as returned by the open-data API, one JSON object per
/// expense document.
pub type RawExpenseData = serde_json::Value;

/// One deputy from the listing endpoint. Party and state are optional in the
/// payload and filled with sentinels later if they never materialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deputy {
    pub id: i64,
    pub nome: String,
    #[serde(rename = "siglaPartido")]
    pub sigla_partido: Option<String>,
    #[serde(rename = "siglaUf")]
    pub sigla_uf: Option<String>,
}

/// Core trait for the legislature open-data API. Keeping it a trait lets the
/// ingester run against a scripted implementation in tests.
#[async_trait::async_trait]
pub trait LegislatureApi: Send + Sync {
    /// Short identifier used in logs and metrics labels.
    fn api_name(&self) -> &'static str;

    /// Fetch the deputy listing. A single page, capped at the configured
    /// page size.
    async fn list_deputies(&self) -> Result<Vec<Deputy>>;

    /// Fetch the home state for one deputy from the detail endpoint, if the
    /// payload carries one.
    async fn deputy_state(&self, deputy_id: i64) -> Result<Option<String>>;

    /// Fetch every expense record for one deputy in one month, draining all
    /// pages. An error here means the deputy/month is incomplete and must
    /// contribute no rows at all.
    async fn monthly_expenses(
        &self,
        deputy_id: i64,
        year: i32,
        month: u32,
    ) -> Result<Vec<RawExpenseData>>;
}
