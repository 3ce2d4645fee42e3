//! ClickHouse HTTP interface backend

use crate::{BackendError, QueryBackend, QueryResult};
use analyst_config::ClickHouseConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to ClickHouse over its HTTP port
pub struct ClickHouseBackend {
    client: Client,
    base_url: String,
    user: String,
    password: String,
}

impl ClickHouseBackend {
    pub fn new(config: &ClickHouseConfig) -> Result<Self, BackendError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl QueryBackend for ClickHouseBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        let url = format!("{}/ping", self.base_url);
        trace!("◆ GET {}", url);
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, BackendError> {
        let url = format!("{}/", self.base_url);
        trace!("◆ POST {}", url);

        let response = self
            .client
            .post(&url)
            .query(&[
                ("default_format", "JSONCompact"),
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(sql.to_string())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Server {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }

        // Statements without a result set come back with an empty body
        if text.trim().is_empty() {
            return Ok(QueryResult::default());
        }

        let json: Value =
            serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))?;
        parse_compact(json)
    }
}

/// Decode a `JSONCompact` body: `{"meta": [{"name", "type"}], "data": [[...]]}`
fn parse_compact(json: Value) -> Result<QueryResult, BackendError> {
    let meta = json["meta"]
        .as_array()
        .ok_or_else(|| BackendError::Decode("missing meta".to_string()))?;
    let column_names = meta
        .iter()
        .map(|column| {
            column["name"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| BackendError::Decode("column without a name".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rows = match &json["data"] {
        Value::Array(rows) => rows
            .iter()
            .map(|row| match row {
                Value::Array(values) => Ok(values.clone()),
                _ => Err(BackendError::Decode("row is not an array".to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Value::Null => Vec::new(),
        _ => return Err(BackendError::Decode("data is not an array".to_string())),
    };

    Ok(QueryResult { column_names, rows })
}
