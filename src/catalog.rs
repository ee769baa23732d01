//! Bundled fallback datasets, the last tier when both network and cache miss.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Immutable map from data type to a canned response.
///
/// Built once at startup and shared behind an `Arc`. Entries are shaped
/// exactly like the live API response for the same data type.
#[derive(Debug, Clone, Default)]
pub struct FallbackCatalog {
  entries: HashMap<String, Value>,
}

impl FallbackCatalog {
  /// An empty catalog.
  pub fn new() -> Self {
    Self::default()
  }

  /// Add or replace the dataset for `data_type`.
  pub fn with_entry(mut self, data_type: impl Into<String>, data: Value) -> Self {
    self.entries.insert(data_type.into(), data);
    self
  }

  /// Overlay `other` on top of this catalog; its entries win.
  pub fn merge(mut self, other: FallbackCatalog) -> Self {
    self.entries.extend(other.entries);
    self
  }

  /// Load a catalog from a JSON object of `{ "<data type>": <dataset>, ... }`.
  pub fn from_json_file(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read catalog file {}: {}", path.display(), e))?;

    let entries: HashMap<String, Value> = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse catalog file {}: {}", path.display(), e))?;

    Ok(Self { entries })
  }

  pub fn lookup(&self, data_type: &str) -> Option<&Value> {
    self.entries.get(data_type)
  }

  /// Look up `data_type` and decode it as `T`.
  ///
  /// A dataset that doesn't match `T` is logged and treated as missing.
  pub fn lookup_as<T: DeserializeOwned>(&self, data_type: &str) -> Option<T> {
    let value = self.lookup(data_type)?;
    match serde_json::from_value(value.clone()) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(data_type, error = %e, "Fallback dataset does not match the requested shape");
        None
      }
    }
  }

  pub fn contains(&self, data_type: &str) -> bool {
    self.entries.contains_key(data_type)
  }

  /// Known data types, sorted.
  pub fn data_types(&self) -> Vec<&str> {
    let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
    types.sort_unstable();
    types
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Sample data for every dashboard data type.
  pub fn builtin() -> Self {
    Self::new()
      .with_entry("alerts", sample_alerts())
      .with_entry("alertStats", sample_alert_stats())
      .with_entry("verificationTasks", sample_verification_tasks())
      .with_entry("mettaStats", sample_metta_stats())
      .with_entry("economicImpact", sample_economic_impact())
      .with_entry("daoProposals", sample_dao_proposals())
      .with_entry("insurancePolicies", sample_insurance_policies())
      .with_entry("userProfile", sample_user_profile())
      .with_entry("newsReports", sample_news_reports())
  }
}

// ============================================================================
// Sample datasets
// ============================================================================

fn sample_alerts() -> Value {
  json!([
    {
      "id": "alert-001",
      "alert_type": "misinformation_spike",
      "severity": "high",
      "title": "Coordinated misinformation campaign detected",
      "message": "Multiple unverified reports about flooding in the Lagos region are spreading rapidly.",
      "location": { "latitude": 6.5244, "longitude": 3.3792, "radius_km": 50.0 },
      "affected_users": ["user-17", "user-42"],
      "created_at": "2024-01-20T09:15:00Z",
      "expires_at": "2024-01-21T09:15:00Z"
    },
    {
      "id": "alert-002",
      "alert_type": "event_verified",
      "severity": "medium",
      "title": "Drought report verified by community",
      "message": "A drought event in Turkana County reached consensus with 5 verifications.",
      "location": { "latitude": 3.1191, "longitude": 35.5973, "radius_km": 100.0 },
      "affected_users": ["user-8"],
      "created_at": "2024-01-20T07:40:00Z",
      "expires_at": null
    },
    {
      "id": "alert-003",
      "alert_type": "early_warning",
      "severity": "low",
      "title": "Source credibility drop",
      "message": "A frequently cited outlet fell below the trust threshold.",
      "location": null,
      "affected_users": [],
      "created_at": "2024-01-19T22:05:00Z",
      "expires_at": "2024-01-22T22:05:00Z"
    }
  ])
}

fn sample_alert_stats() -> Value {
  json!({
    "total_alerts": 3,
    "active_alerts": 2,
    "expired_alerts": 1,
    "alerts_by_type": {
      "misinformation_spike": 1,
      "event_verified": 1,
      "early_warning": 1
    },
    "alerts_by_severity": { "high": 1, "medium": 1, "low": 1 },
    "total_affected_users": 3
  })
}

fn sample_verification_tasks() -> Value {
  json!([
    {
      "event_id": "event-1042",
      "event_type": "flood",
      "description": "Street-level flooding reported near the central market.",
      "status": "pending",
      "assigned_at": "2024-01-20T08:00:00Z",
      "deadline": "2024-01-21T08:00:00Z",
      "reward": 12.5
    },
    {
      "event_id": "event-1043",
      "event_type": "news_report",
      "description": "Claim that a regional election was postponed.",
      "status": "in_review",
      "assigned_at": "2024-01-20T06:30:00Z",
      "deadline": "2024-01-20T18:30:00Z",
      "reward": 8.0
    }
  ])
}

fn sample_metta_stats() -> Value {
  json!({
    "metta_stats": {
      "total_atoms": 1284,
      "active_queries": 12,
      "knowledge_domains": [
        "news-articles",
        "user-trust",
        "verification-rules",
        "source-credibility",
        "content-integrity"
      ],
      "last_update": "2024-01-20T10:30:00Z",
      "query_performance": {
        "avg_execution_time": "0.234s",
        "cache_hit_rate": 0.78,
        "successful_queries": 156,
        "ai_generation_success_rate": 0.92
      },
      "ai_integration": {
        "anthropic_available": false,
        "metta_run_available": true,
        "supported_functions": 8
      }
    },
    "database_stats": {
      "total_events": 428,
      "total_users": 93,
      "verified_events": 311
    }
  })
}

fn sample_economic_impact() -> Value {
  json!({
    "event_id": "event-1042",
    "estimated_loss_usd": 185000.0,
    "affected_households": 240,
    "sectors": [
      { "name": "agriculture", "impact_score": 0.72 },
      { "name": "transport", "impact_score": 0.41 }
    ],
    "recovery_estimate_days": 45,
    "confidence": 0.66
  })
}

fn sample_dao_proposals() -> Value {
  json!([
    {
      "proposal_id": "prop-7",
      "title": "Raise minimum verifications to 4",
      "status": "active",
      "votes_for": 182,
      "votes_against": 47,
      "ends_at": "2024-01-25T00:00:00Z"
    },
    {
      "proposal_id": "prop-6",
      "title": "Fund regional verifier onboarding",
      "status": "passed",
      "votes_for": 240,
      "votes_against": 12,
      "ends_at": "2024-01-15T00:00:00Z"
    }
  ])
}

fn sample_insurance_policies() -> Value {
  json!([
    {
      "policy_id": "policy-301",
      "coverage_type": "crop_drought",
      "premium": 25.0,
      "coverage_amount": 1500.0,
      "status": "active",
      "location": { "latitude": 3.1191, "longitude": 35.5973 }
    }
  ])
}

fn sample_user_profile() -> Value {
  json!({
    "id": "user-42",
    "username": "field_reporter",
    "role": "verifier",
    "trust_score": 82,
    "verified_reports": 37,
    "joined_at": "2023-09-02T12:00:00Z"
  })
}

fn sample_news_reports() -> Value {
  json!([
    {
      "id": "news-88",
      "title": "Bridge closure after heavy rainfall",
      "source": "Coastal Herald",
      "integrity_level": "high",
      "verification_count": 6,
      "published_at": "2024-01-19T16:20:00Z"
    },
    {
      "id": "news-89",
      "title": "Unconfirmed report of fuel shortage",
      "source": "unknown",
      "integrity_level": "low",
      "verification_count": 1,
      "published_at": "2024-01-20T05:10:00Z"
    }
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[test]
  fn test_builtin_covers_dashboard_types() {
    let catalog = FallbackCatalog::builtin();
    for data_type in ["alerts", "verificationTasks", "mettaStats"] {
      assert!(catalog.contains(data_type), "missing {}", data_type);
    }
    assert_eq!(catalog.data_types().len(), catalog.len());
  }

  #[test]
  fn test_unknown_type_is_none() {
    let catalog = FallbackCatalog::builtin();
    assert!(catalog.lookup("doesNotExist").is_none());
    assert!(catalog.lookup_as::<Value>("doesNotExist").is_none());
  }

  #[test]
  fn test_lookup_as_typed() {
    #[derive(Deserialize)]
    struct Alert {
      id: String,
      severity: String,
    }

    let alerts: Vec<Alert> = FallbackCatalog::builtin().lookup_as("alerts").unwrap();
    assert_eq!(alerts.len(), 3);
    assert_eq!(alerts[0].id, "alert-001");
    assert_eq!(alerts[0].severity, "high");
  }

  #[test]
  fn test_lookup_as_wrong_shape_is_none() {
    let catalog = FallbackCatalog::builtin();
    assert!(catalog.lookup_as::<Vec<String>>("mettaStats").is_none());
  }

  #[test]
  fn test_merge_overrides_entries() {
    let catalog = FallbackCatalog::builtin()
      .merge(FallbackCatalog::new().with_entry("alerts", json!([])));
    assert_eq!(catalog.lookup("alerts"), Some(&json!([])));
    assert!(catalog.contains("mettaStats"));
  }

  #[test]
  fn test_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, r#"{"alerts": [{"id": "custom"}]}"#).unwrap();

    let catalog = FallbackCatalog::from_json_file(&path).unwrap();
    assert_eq!(catalog.data_types(), vec!["alerts"]);

    std::fs::write(&path, "[1, 2]").unwrap();
    assert!(FallbackCatalog::from_json_file(&path).is_err());
  }
}
