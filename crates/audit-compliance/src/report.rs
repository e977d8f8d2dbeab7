//! Compliance Reporter (C14): aggregates stored events into HIPAA/GDPR and
//! integrity-verification reports. Callers are trusted to have scoped
//! `ReportCriteria.organization_ids` to their own authorization boundary —
//! this module never widens or cross-organization joins that scope.

use audit_core::error::Result;
use audit_core::integrity;
use audit_core::model::{AuditEvent, DataClassification, EventStatus};
use audit_storage::{EnhancedStorageClient, ReportCriteria};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportType {
    Hipaa,
    Gdpr,
    General,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub report_id: Uuid,
    pub report_type: ReportType,
    pub generated_at: DateTime<Utc>,
    pub criteria: ReportCriteria,
    pub total_events: usize,
    pub filtered_events: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TimeRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReportSummary {
    pub events_by_status: HashMap<String, usize>,
    pub events_by_action: HashMap<String, usize>,
    pub events_by_data_classification: HashMap<String, usize>,
    pub unique_principals: usize,
    pub unique_resources: usize,
    pub integrity_violations: usize,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub events: Vec<AuditEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityFailure {
    pub event_id: String,
    pub expected_hash: String,
    pub computed_hash: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityResults {
    pub total_events: usize,
    pub verified_events: usize,
    pub failed_verifications: usize,
    pub verification_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityVerificationReport {
    pub verification_id: Uuid,
    pub verified_at: DateTime<Utc>,
    pub results: IntegrityResults,
    pub failures: Vec<IntegrityFailure>,
}

pub struct ComplianceReporter<'a> {
    storage: &'a EnhancedStorageClient,
}

impl<'a> ComplianceReporter<'a> {
    pub fn new(storage: &'a EnhancedStorageClient) -> Self {
        Self { storage }
    }

    /// Builds a general-purpose compliance report over events matching
    /// `criteria`. Counts integrity violations via `verify_hash` per event.
    pub async fn generate_compliance_report(
        &self,
        criteria: &ReportCriteria,
        report_type: ReportType,
    ) -> Result<ComplianceReport> {
        let events = self.storage.query_events(criteria).await?;
        self.build_report(events, report_type, criteria)
    }

    /// HIPAA scoping: only events classified PHI are in scope.
    pub async fn generate_hipaa_report(&self, criteria: &ReportCriteria) -> Result<ComplianceReport> {
        let events = self.storage.query_events(criteria).await?;
        let scoped: Vec<AuditEvent> =
            events.into_iter().filter(|e| e.data_classification == DataClassification::Phi).collect();
        self.build_report(scoped, ReportType::Hipaa, criteria)
    }

    /// GDPR scoping: only events tied to an identifiable data subject
    /// (`principal_id` present) are in scope — these are the processing
    /// actions a subject access request would need to surface.
    pub async fn generate_gdpr_report(&self, criteria: &ReportCriteria) -> Result<ComplianceReport> {
        let events = self.storage.query_events(criteria).await?;
        let scoped: Vec<AuditEvent> = events.into_iter().filter(|e| e.principal_id.is_some()).collect();
        self.build_report(scoped, ReportType::Gdpr, criteria)
    }

    fn build_report(&self, events: Vec<AuditEvent>, report_type: ReportType, criteria: &ReportCriteria) -> Result<ComplianceReport> {
        let total_events = events.len();
        let mut summary = ReportSummary::default();
        let mut principals = HashSet::new();
        let mut resources = HashSet::new();

        for event in &events {
            *summary.events_by_status.entry(status_key(event.status).to_string()).or_default() += 1;
            *summary.events_by_action.entry(event.action.clone()).or_default() += 1;
            *summary
                .events_by_data_classification
                .entry(classification_key(event.data_classification).to_string())
                .or_default() += 1;

            if let Some(principal) = &event.principal_id {
                principals.insert(principal.clone());
            }
            if let Some(resource) = &event.target_resource_id {
                resources.insert(resource.clone());
            }
            if integrity::verify_hash(event).is_err() {
                summary.integrity_violations += 1;
            }

            summary.time_range.earliest =
                Some(summary.time_range.earliest.map_or(event.timestamp, |e| e.min(event.timestamp)));
            summary.time_range.latest =
                Some(summary.time_range.latest.map_or(event.timestamp, |l| l.max(event.timestamp)));
        }

        summary.unique_principals = principals.len();
        summary.unique_resources = resources.len();
        let filtered_events = events.len();

        Ok(ComplianceReport {
            metadata: ReportMetadata {
                report_id: Uuid::new_v4(),
                report_type,
                generated_at: Utc::now(),
                criteria: criteria.clone(),
                total_events,
                filtered_events,
            },
            summary,
            events,
        })
    }

    /// Recomputes each event's hash and compares it with the stored value.
    /// When `perform_verification` is false, returns a zero-cost skeleton
    /// report (used by callers that only want the event count).
    pub async fn generate_integrity_verification_report(
        &self,
        criteria: &ReportCriteria,
        perform_verification: bool,
    ) -> Result<IntegrityVerificationReport> {
        let events = self.storage.query_events(criteria).await?;
        let total_events = events.len();

        if !perform_verification {
            return Ok(IntegrityVerificationReport {
                verification_id: Uuid::new_v4(),
                verified_at: Utc::now(),
                results: IntegrityResults { total_events, verified_events: 0, failed_verifications: 0, verification_rate: 0.0 },
                failures: Vec::new(),
            });
        }

        let mut verified = 0;
        let mut failures = Vec::new();

        for event in &events {
            match integrity::verify_hash(event) {
                Ok(()) => verified += 1,
                Err(err) => {
                    let computed = integrity::hash(event);
                    failures.push(IntegrityFailure {
                        event_id: event.correlation_id.clone().unwrap_or_else(|| "unknown".to_string()),
                        expected_hash: event.hash.clone().unwrap_or_default(),
                        computed_hash: computed,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let verification_rate = if total_events > 0 { verified as f64 / total_events as f64 } else { 1.0 };

        Ok(IntegrityVerificationReport {
            verification_id: Uuid::new_v4(),
            verified_at: Utc::now(),
            results: IntegrityResults { total_events, verified_events: verified, failed_verifications: failures.len(), verification_rate },
            failures,
        })
    }
}

fn status_key(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Attempt => "attempt",
        EventStatus::Success => "success",
        EventStatus::Failure => "failure",
    }
}

fn classification_key(classification: DataClassification) -> &'static str {
    match classification {
        DataClassification::Public => "PUBLIC",
        DataClassification::Internal => "INTERNAL",
        DataClassification::Confidential => "CONFIDENTIAL",
        DataClassification::Phi => "PHI",
    }
}
