//! REST client for the News Integrity backend.
//!
//! Maps data types to endpoint paths and turns non-2xx responses into errors,
//! so callers can hand its futures straight to the retry loop.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;

/// Built-in data type routes. Config entries win over these.
const DEFAULT_ENDPOINTS: &[(&str, &str)] = &[
  ("alerts", "/api/news/alerts/global"),
  ("alertStats", "/api/alerts/stats"),
  ("verificationTasks", "/api/community-verification/assignments/me"),
  ("mettaStats", "/api/ai-metta/stats"),
  ("economicImpact", "/api/economic-impact/dashboard/overview"),
  ("daoProposals", "/api/dao/proposals/active"),
  ("insurancePolicies", "/api/blockchain/policies"),
  ("userProfile", "/api/auth/me"),
  ("newsReports", "/api/news/reports"),
];

/// Backend API client
#[derive(Clone)]
pub struct ApiClient {
  client: reqwest::Client,
  base_url: Url,
  endpoints: BTreeMap<String, String>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let mut endpoints: BTreeMap<String, String> = DEFAULT_ENDPOINTS
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    endpoints.extend(config.endpoints.clone());

    Ok(Self {
      client,
      base_url,
      endpoints,
    })
  }

  /// Data types this client knows how to fetch.
  pub fn data_types(&self) -> impl Iterator<Item = &str> {
    self.endpoints.keys().map(String::as_str)
  }

  /// Resolve the full URL for `data_type`.
  pub fn url_for(&self, data_type: &str) -> Result<Url> {
    let path = self
      .endpoints
      .get(data_type)
      .ok_or_else(|| eyre!("No endpoint configured for data type '{}'", data_type))?;

    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {} for {}: {}", path, data_type, e))
  }

  /// GET the endpoint for `data_type` and decode the JSON body.
  pub async fn get<T: DeserializeOwned>(&self, data_type: &str) -> Result<T> {
    let url = self.url_for(data_type)?;
    debug!(data_type, %url, "GET");

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?
      .error_for_status()
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", url, e))
  }
}
