//! Audit event data model: the canonical `AuditEvent` and its nested types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Outcome recorded for the action the event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Attempt,
    Success,
    Failure,
}

/// Sensitivity tier of the data an event touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Phi,
}

impl Default for DataClassification {
    fn default() -> Self {
        DataClassification::Internal
    }
}

/// Identity/geolocation context captured at the time of the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub geolocation: Option<String>,
}

/// An immutable, hash-bound record of a significant action within the system.
///
/// Fields are grouped as: identity/action (participate in the canonical hash,
/// see `audit_core::integrity`), descriptive/classification metadata, and the
/// open `custom_fields` extension map, which never participates in hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub status: EventStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resource_id: Option<String>,

    #[serde(default)]
    pub data_classification: DataClassification,
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_context: Option<SessionContext>,

    #[serde(default = "default_event_version")]
    pub event_version: String,
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default)]
    pub custom_fields: BTreeMap<String, Value>,
}

fn default_retention_policy() -> String {
    "standard".to_string()
}

fn default_event_version() -> String {
    "1.0".to_string()
}

fn default_hash_algorithm() -> String {
    "SHA-256".to_string()
}

impl AuditEvent {
    /// Starts a builder, requiring the three always-required fields up front.
    pub fn builder(
        timestamp: DateTime<Utc>,
        action: impl Into<String>,
        status: EventStatus,
    ) -> AuditEventBuilder {
        AuditEventBuilder::new(timestamp, action, status)
    }

    /// An event is queryable in reports only if it carries a principal or an
    /// organization identity.
    pub fn is_queryable(&self) -> bool {
        self.principal_id.is_some() || self.organization_id.is_some()
    }
}

/// Fluent builder for constructing an `AuditEvent` field by field.
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(timestamp: DateTime<Utc>, action: impl Into<String>, status: EventStatus) -> Self {
        Self {
            event: AuditEvent {
                timestamp,
                action: action.into(),
                status,
                principal_id: None,
                organization_id: None,
                target_resource_type: None,
                target_resource_id: None,
                data_classification: DataClassification::default(),
                retention_policy: default_retention_policy(),
                outcome_description: None,
                session_context: None,
                event_version: default_event_version(),
                hash_algorithm: default_hash_algorithm(),
                correlation_id: None,
                hash: None,
                signature: None,
                custom_fields: BTreeMap::new(),
            },
        }
    }

    pub fn principal_id(mut self, id: impl Into<String>) -> Self {
        self.event.principal_id = Some(id.into());
        self
    }

    pub fn organization_id(mut self, id: impl Into<String>) -> Self {
        self.event.organization_id = Some(id.into());
        self
    }

    pub fn target_resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.event.target_resource_type = Some(kind.into());
        self.event.target_resource_id = Some(id.into());
        self
    }

    pub fn data_classification(mut self, classification: DataClassification) -> Self {
        self.event.data_classification = classification;
        self
    }

    pub fn retention_policy(mut self, policy: impl Into<String>) -> Self {
        self.event.retention_policy = policy.into();
        self
    }

    pub fn outcome_description(mut self, description: impl Into<String>) -> Self {
        self.event.outcome_description = Some(description.into());
        self
    }

    pub fn session_context(mut self, context: SessionContext) -> Self {
        self.event.session_context = Some(context);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.event.correlation_id = Some(id.into());
        self
    }

    pub fn custom_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.event.custom_fields.insert(key.into(), value);
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_spec() {
        let event = AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success).build();
        assert_eq!(event.data_classification, DataClassification::Internal);
        assert_eq!(event.retention_policy, "standard");
        assert_eq!(event.event_version, "1.0");
        assert_eq!(event.hash_algorithm, "SHA-256");
        assert!(!event.is_queryable());
    }

    #[test]
    fn queryable_requires_principal_or_org() {
        let event = AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success)
            .principal_id("u1")
            .build();
        assert!(event.is_queryable());
    }
}
