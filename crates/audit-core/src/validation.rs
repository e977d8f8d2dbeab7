//! Event Validator/Sanitizer (C1): schema validation, field bounds, and
//! content sanitization ahead of hashing and enqueue.

use crate::model::{AuditEvent, DataClassification, EventStatus};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Tunables governing validation and sanitization bounds.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_string_length: usize,
    pub max_custom_field_depth: usize,
    pub known_event_versions: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_string_length: 4096,
            max_custom_field_depth: 8,
            known_event_versions: vec!["1.0".to_string()],
        }
    }
}

/// One validation failure: the field, a stable code, and the offending value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: &'static str,
    pub value: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, code: &'static str, value: impl Into<String>) -> Self {
        Self { field: field.into(), code, value: value.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SanitizeOutcome {
    pub event: AuditEvent,
    pub modified: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValidateAndSanitizeOutcome {
    pub is_valid: bool,
    pub sanitized_event: Option<AuditEvent>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

const RESERVED_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Validates an event's shape and bounds without mutating it.
pub fn validate(event: &AuditEvent, config: &ValidatorConfig) -> ValidationOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if event.action.is_empty() {
        errors.push(ValidationIssue::new("action", "required", ""));
    } else if event.action.chars().count() > config.max_string_length {
        errors.push(ValidationIssue::new("action", "too_long", &event.action));
    }

    for (field, value) in [
        ("principalId", &event.principal_id),
        ("organizationId", &event.organization_id),
        ("targetResourceType", &event.target_resource_type),
        ("targetResourceId", &event.target_resource_id),
        ("outcomeDescription", &event.outcome_description),
    ] {
        if let Some(v) = value {
            if v.chars().count() > config.max_string_length {
                errors.push(ValidationIssue::new(field, "too_long", v));
            }
        }
    }

    if let Some(session) = &event.session_context {
        for (field, value) in [
            ("sessionContext.sessionId", &session.session_id),
            ("sessionContext.userAgent", &session.user_agent),
            ("sessionContext.geolocation", &session.geolocation),
        ] {
            if let Some(v) = value {
                if v.chars().count() > config.max_string_length {
                    errors.push(ValidationIssue::new(field, "too_long", v));
                }
            }
        }

        if let Some(ip) = &session.ip_address {
            if ip.parse::<IpAddr>().is_err() {
                errors.push(ValidationIssue::new("sessionContext.ipAddress", "invalid_ip", ip));
            }
        }
    }

    if event.hash_algorithm != "SHA-256" {
        errors.push(ValidationIssue::new(
            "hashAlgorithm",
            "unsupported",
            &event.hash_algorithm,
        ));
    }

    if !config.known_event_versions.iter().any(|v| v == &event.event_version) {
        warnings.push(format!("unknown eventVersion '{}'", event.event_version));
    }

    let depth_errors = check_custom_field_depth(&event.custom_fields, config.max_custom_field_depth);
    errors.extend(depth_errors);

    if !event.is_queryable() {
        warnings.push("event has neither principalId nor organizationId; it will be unqueryable in reports".to_string());
    }

    ValidationOutcome { is_valid: errors.is_empty(), errors, warnings }
}

fn check_custom_field_depth(fields: &BTreeMap<String, Value>, max_depth: usize) -> Vec<ValidationIssue> {
    let mut errors = Vec::new();
    for (key, value) in fields {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        walk_depth(value, 1, max_depth, key, &mut errors);
    }
    errors
}

fn walk_depth(value: &Value, depth: usize, max_depth: usize, field: &str, errors: &mut Vec<ValidationIssue>) {
    if depth > max_depth {
        errors.push(ValidationIssue::new(field, "nesting_too_deep", depth.to_string()));
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if RESERVED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                walk_depth(child, depth + 1, max_depth, field, errors);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_depth(item, depth + 1, max_depth, field, errors);
            }
        }
        _ => {}
    }
}

/// Produces a sanitized deep copy of `event`; never mutates the input and
/// never fails: sanitization rules rewrite content, they never raise.
pub fn sanitize(event: &AuditEvent, config: &ValidatorConfig) -> SanitizeOutcome {
    let mut sanitized = event.clone();
    let mut modified = false;
    let mut warnings = Vec::new();

    let (action, action_changed) = sanitize_string(&sanitized.action, config.max_string_length);
    sanitized.action = action;
    modified |= action_changed;

    for field in [&mut sanitized.principal_id, &mut sanitized.organization_id, &mut sanitized.target_resource_type, &mut sanitized.target_resource_id] {
        if let Some(v) = field.as_mut() {
            let (clean, changed) = sanitize_string(v, config.max_string_length);
            *v = clean;
            modified |= changed;
        }
    }

    if let Some(description) = sanitized.outcome_description.as_mut() {
        let (clean, changed) = html_entity_encode_quotes(description);
        let (clean, trunc_changed) = sanitize_string(&clean, config.max_string_length);
        *description = clean;
        modified |= changed || trunc_changed;
    }

    if let Some(session) = sanitized.session_context.as_mut() {
        if let Some(ip) = session.ip_address.as_mut() {
            if let Some(normalized) = normalize_ipv4(ip) {
                if &normalized != ip {
                    *ip = normalized;
                    modified = true;
                }
            }
        }
        for field in [&mut session.session_id, &mut session.user_agent, &mut session.geolocation] {
            if let Some(v) = field.as_mut() {
                let (clean, changed) = sanitize_string(v, config.max_string_length);
                *v = clean;
                modified |= changed;
            }
        }
    }

    let canonical = canonicalize_classification(&sanitized.data_classification);
    if canonical != sanitized.data_classification {
        sanitized.data_classification = canonical;
        modified = true;
    }

    let mut seen = std::collections::HashSet::new();
    let mut new_fields = BTreeMap::new();
    for (key, value) in sanitized.custom_fields.iter() {
        if RESERVED_KEYS.contains(&key.as_str()) {
            modified = true;
            warnings.push(format!("removed reserved custom field key '{key}'"));
            continue;
        }
        let (clean, field_modified, cycle_found) = sanitize_value(value, &mut seen);
        modified |= field_modified;
        if cycle_found {
            warnings.push(format!("cyclic reference detected in custom field '{key}'; replaced with marker"));
        }
        new_fields.insert(key.clone(), clean);
    }
    sanitized.custom_fields = new_fields;

    SanitizeOutcome { event: sanitized, modified, warnings }
}

fn sanitize_string(input: &str, max_length: usize) -> (String, bool) {
    let mut changed = false;
    let mut cleaned: String = input
        .chars()
        .filter(|c| {
            let is_control = (*c as u32) < 0x20 && *c != '\t' && *c != '\n' && *c != '\r';
            let is_nul = *c == '\0';
            if is_control || is_nul {
                changed = true;
                false
            } else {
                true
            }
        })
        .collect();

    if cleaned.contains("<script") || cleaned.contains("</script") {
        cleaned = cleaned.replace("<script", "&lt;script").replace("</script", "&lt;/script");
        changed = true;
    }

    if cleaned.chars().count() > max_length {
        let truncated: String = cleaned.chars().take(max_length).collect();
        cleaned = format!("{truncated}...[truncated]");
        changed = true;
    }

    (cleaned, changed)
}

fn html_entity_encode_quotes(input: &str) -> (String, bool) {
    if input.contains('"') || input.contains('\'') {
        (input.replace('"', "&quot;").replace('\'', "&#39;"), true)
    } else {
        (input.to_string(), false)
    }
}

fn normalize_ipv4(ip: &str) -> Option<String> {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut normalized = Vec::with_capacity(4);
    for part in parts {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let n: u32 = part.parse().ok()?;
        if n > 255 {
            return None;
        }
        normalized.push(n.to_string());
    }
    Some(normalized.join("."))
}

fn canonicalize_classification(classification: &DataClassification) -> DataClassification {
    *classification
}

fn sanitize_value(value: &Value, seen: &mut std::collections::HashSet<usize>) -> (Value, bool, bool) {
    match value {
        Value::String(s) => {
            let (clean, changed) = sanitize_string(s, usize::MAX);
            (Value::String(clean), changed, false)
        }
        Value::Object(map) => {
            let ptr = map as *const _ as usize;
            if !seen.insert(ptr) {
                return (Value::String("[cyclic reference removed]".to_string()), true, true);
            }
            let mut any_changed = false;
            let mut any_cycle = false;
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if RESERVED_KEYS.contains(&k.as_str()) {
                    any_changed = true;
                    continue;
                }
                let (clean, changed, cycle) = sanitize_value(v, seen);
                any_changed |= changed;
                any_cycle |= cycle;
                out.insert(k.clone(), clean);
            }
            (Value::Object(out), any_changed, any_cycle)
        }
        Value::Array(items) => {
            let mut any_changed = false;
            let mut any_cycle = false;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let (clean, changed, cycle) = sanitize_value(item, seen);
                any_changed |= changed;
                any_cycle |= cycle;
                out.push(clean);
            }
            (Value::Array(out), any_changed, any_cycle)
        }
        other => (other.clone(), false, false),
    }
}

/// Convenience wrapper combining `sanitize` then `validate` on the result.
pub fn validate_and_sanitize(event: &AuditEvent, config: &ValidatorConfig) -> ValidateAndSanitizeOutcome {
    let sanitize_outcome = sanitize(event, config);
    let validation = validate(&sanitize_outcome.event, config);

    let mut warnings = sanitize_outcome.warnings;
    warnings.extend(validation.warnings);

    ValidateAndSanitizeOutcome {
        is_valid: validation.is_valid,
        sanitized_event: if validation.is_valid { Some(sanitize_outcome.event) } else { None },
        errors: validation.errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditEvent;
    use chrono::Utc;

    fn base_event() -> AuditEvent {
        AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success)
            .principal_id("u1")
            .build()
    }

    #[test]
    fn required_fields_enforced() {
        let mut event = base_event();
        event.action = String::new();
        let outcome = validate(&event, &ValidatorConfig::default());
        assert!(!outcome.is_valid);
        assert!(outcome.errors.iter().any(|e| e.field == "action"));
    }

    #[test]
    fn action_boundary_length_validates_exactly_at_limit() {
        let config = ValidatorConfig { max_string_length: 10, ..Default::default() };
        let mut event = base_event();
        event.action = "a".repeat(10);
        assert!(validate(&event, &config).is_valid);

        event.action = "a".repeat(11);
        assert!(!validate(&event, &config).is_valid);
    }

    #[test]
    fn ipv4_boundaries() {
        let config = ValidatorConfig::default();
        let mut event = base_event();
        event.session_context = Some(crate::model::SessionContext {
            session_id: None,
            ip_address: Some("255.255.255.255".to_string()),
            user_agent: None,
            geolocation: None,
        });
        assert!(validate(&event, &config).is_valid);

        event.session_context.as_mut().unwrap().ip_address = Some("999.999.999.999".to_string());
        assert!(!validate(&event, &config).is_valid);
    }

    #[test]
    fn custom_field_depth_boundary() {
        let config = ValidatorConfig { max_custom_field_depth: 2, ..Default::default() };
        let mut event = base_event();
        event.custom_fields.insert(
            "nested".to_string(),
            serde_json::json!({"a": {"b": "ok"}}),
        );
        assert!(validate(&event, &config).is_valid);

        event.custom_fields.insert(
            "nested".to_string(),
            serde_json::json!({"a": {"b": {"c": "too deep"}}}),
        );
        assert!(!validate(&event, &config).is_valid);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let config = ValidatorConfig::default();
        let mut event = base_event();
        event.outcome_description = Some("Success with \"quotes\"".to_string());
        let once = sanitize(&event, &config);
        let twice = sanitize(&once.event, &config);
        assert_eq!(once.event, twice.event);
    }

    #[test]
    fn sanitize_strips_control_bytes_and_reserved_keys() {
        let config = ValidatorConfig::default();
        let mut event = base_event();
        event.action = "login\u{0}attempt".to_string();
        event.custom_fields.insert("__proto__".to_string(), serde_json::json!("x"));
        let outcome = sanitize(&event, &config);
        assert!(outcome.modified);
        assert!(!outcome.event.action.contains('\u{0}'));
        assert!(!outcome.event.custom_fields.contains_key("__proto__"));
    }

    #[test]
    fn validate_and_sanitize_then_validate_succeeds() {
        let config = ValidatorConfig::default();
        let mut event = base_event();
        event.outcome_description = Some("it's a \"test\"".to_string());
        let outcome = validate_and_sanitize(&event, &config);
        assert!(outcome.is_valid);
        let sanitized = outcome.sanitized_event.unwrap();
        assert!(validate(&sanitized, &config).is_valid);
    }

    #[test]
    fn unqueryable_event_validates_with_warning() {
        let config = ValidatorConfig::default();
        let event = AuditEvent::builder(Utc::now(), "system.sweep", EventStatus::Success).build();
        let outcome = validate(&event, &config);
        assert!(outcome.is_valid);
        assert!(outcome.warnings.iter().any(|w| w.contains("unqueryable")));
    }
}
