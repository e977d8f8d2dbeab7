//! Export Encoder (C15): serializes a `ComplianceReport` to JSON/CSV/XML/PDF,
//! then runs a fixed post-encoding pipeline: optional compression, optional
//! authenticated encryption, and a SHA-256 checksum over the final bytes.

use crate::report::ComplianceReport;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use audit_core::error::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use printpdf::{BuiltinFont, Mm, PdfDocument};
use sha2::{Digest, Sha256};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Xml,
    Pdf,
}

impl ExportFormat {
    fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Xml => "xml",
            ExportFormat::Pdf => "pdf",
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xml => "application/xml",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    Gzip,
    Zip,
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub key: [u8; 32],
    pub key_id: String,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub include_metadata: bool,
    pub include_integrity_report: bool,
    pub compression: Option<CompressionKind>,
    pub encryption: Option<EncryptionConfig>,
    pub max_pdf_events: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            include_metadata: true,
            include_integrity_report: false,
            compression: None,
            encryption: None,
            max_pdf_events: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionInfo {
    pub kind: CompressionKind,
}

#[derive(Debug, Clone)]
pub struct EncryptionInfo {
    pub algorithm: &'static str,
    pub key_id: String,
    pub nonce: String,
}

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub export_id: uuid::Uuid,
    pub format: ExportFormat,
    pub exported_at: chrono::DateTime<chrono::Utc>,
    pub data: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
    pub size: usize,
    pub checksum: String,
    pub compression: Option<CompressionInfo>,
    pub encryption: Option<EncryptionInfo>,
}

/// Encodes `report` per `options.format`, then applies the fixed
/// compress → encrypt → checksum pipeline in that order.
pub fn export(report: &ComplianceReport, options: &ExportOptions) -> Result<ExportResult> {
    let mut encoded = match options.format {
        ExportFormat::Json => encode_json(report, options)?,
        ExportFormat::Csv => encode_csv(report, options)?,
        ExportFormat::Xml => encode_xml(report, options)?,
        ExportFormat::Pdf => encode_pdf(report, options)?,
    };

    let mut filename = format!("audit-report-{}.{}", report.metadata.report_id, options.format.extension());
    let mut compression_info = None;

    if let Some(kind) = options.compression {
        encoded = compress(&encoded, kind)?;
        filename.push_str(match kind {
            CompressionKind::Gzip => ".gz",
            CompressionKind::Zip => ".zip",
        });
        compression_info = Some(CompressionInfo { kind });
    }

    let mut encryption_info = None;
    if let Some(enc_config) = &options.encryption {
        let (ciphertext, nonce) = encrypt(&encoded, enc_config)?;
        encoded = ciphertext;
        filename.push_str(".enc");
        encryption_info =
            Some(EncryptionInfo { algorithm: "AES-256-GCM", key_id: enc_config.key_id.clone(), nonce: hex::encode(nonce) });
    }

    let checksum = hex::encode(Sha256::digest(&encoded));
    let size = encoded.len();

    Ok(ExportResult {
        export_id: uuid::Uuid::new_v4(),
        format: options.format,
        exported_at: chrono::Utc::now(),
        data: encoded,
        content_type: options.format.content_type(),
        filename,
        size,
        checksum,
        compression: compression_info,
        encryption: encryption_info,
    })
}

fn encode_json(report: &ComplianceReport, options: &ExportOptions) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(report)?;
    if !options.include_metadata {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("metadata");
        }
    }
    Ok(serde_json::to_vec_pretty(&value)?)
}

fn integrity_status(event: &audit_core::model::AuditEvent) -> &'static str {
    match audit_core::integrity::verify_hash(event) {
        Ok(()) => "verified",
        Err(_) => "failed",
    }
}

fn encode_csv(report: &ComplianceReport, options: &ExportOptions) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    if options.include_metadata {
        writeln!(buffer, "# reportId: {}", report.metadata.report_id).map_err(csv_io_error)?;
        writeln!(buffer, "# reportType: {:?}", report.metadata.report_type).map_err(csv_io_error)?;
        writeln!(buffer, "# generatedAt: {}", report.metadata.generated_at.to_rfc3339()).map_err(csv_io_error)?;
    }

    let mut writer = csv::WriterBuilder::new().from_writer(buffer);
    writer.write_record([
        "ID",
        "Timestamp",
        "Principal ID",
        "Organization ID",
        "Action",
        "Target Resource Type",
        "Target Resource ID",
        "Status",
        "Outcome Description",
        "Data Classification",
        "IP Address",
        "User Agent",
        "Session ID",
        "Integrity Status",
        "Correlation ID",
    ])
    .map_err(csv_error)?;

    for event in &report.events {
        let session = event.session_context.as_ref();
        writer
            .write_record([
                event.correlation_id.clone().unwrap_or_default(),
                event.timestamp.to_rfc3339(),
                event.principal_id.clone().unwrap_or_default(),
                event.organization_id.clone().unwrap_or_default(),
                event.action.clone(),
                event.target_resource_type.clone().unwrap_or_default(),
                event.target_resource_id.clone().unwrap_or_default(),
                format!("{:?}", event.status).to_lowercase(),
                event.outcome_description.clone().unwrap_or_default(),
                format!("{:?}", event.data_classification).to_uppercase(),
                session.and_then(|s| s.ip_address.clone()).unwrap_or_default(),
                session.and_then(|s| s.user_agent.clone()).unwrap_or_default(),
                session.and_then(|s| s.session_id.clone()).unwrap_or_default(),
                integrity_status(event).to_string(),
                event.correlation_id.clone().unwrap_or_default(),
            ])
            .map_err(csv_error)?;
    }

    writer.into_inner().map_err(|e| Error::export_encoding_failed(e.to_string()))
}

fn csv_error(err: csv::Error) -> Error {
    Error::export_encoding_failed(format!("csv encoding failed: {err}"))
}

fn csv_io_error(err: std::io::Error) -> Error {
    Error::export_encoding_failed(format!("csv metadata write failed: {err}"))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn encode_xml(report: &ComplianceReport, options: &ExportOptions) -> Result<Vec<u8>> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<auditReport>\n");

    if options.include_metadata {
        xml.push_str(&format!(
            "  <metadata><reportId>{}</reportId><reportType>{:?}</reportType><generatedAt>{}</generatedAt>\
             <totalEvents>{}</totalEvents><filteredEvents>{}</filteredEvents></metadata>\n",
            xml_escape(&report.metadata.report_id.to_string()),
            report.metadata.report_type,
            xml_escape(&report.metadata.generated_at.to_rfc3339()),
            report.metadata.total_events,
            report.metadata.filtered_events,
        ));
    }

    xml.push_str(&format!(
        "  <summary><uniquePrincipals>{}</uniquePrincipals><uniqueResources>{}</uniqueResources>\
         <integrityViolations>{}</integrityViolations></summary>\n",
        report.summary.unique_principals, report.summary.unique_resources, report.summary.integrity_violations,
    ));

    xml.push_str("  <events>\n");
    for event in &report.events {
        xml.push_str(&format!(
            "    <event><action>{}</action><status>{:?}</status><principalId>{}</principalId>\
             <organizationId>{}</organizationId><timestamp>{}</timestamp></event>\n",
            xml_escape(&event.action),
            event.status,
            xml_escape(event.principal_id.as_deref().unwrap_or("")),
            xml_escape(event.organization_id.as_deref().unwrap_or("")),
            xml_escape(&event.timestamp.to_rfc3339()),
        ));
    }
    xml.push_str("  </events>\n</auditReport>\n");

    Ok(xml.into_bytes())
}

/// A deterministic, single-column layout: title, metadata block, summary
/// block, then up to `max_pdf_events` event rows — enough to be legible
/// without attempting full HTML/CSS layout fidelity.
fn encode_pdf(report: &ComplianceReport, options: &ExportOptions) -> Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new("Compliance Report", Mm(210.0), Mm(297.0), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| Error::export_encoding_failed(format!("pdf font load failed: {e}")))?;
    let current_layer = doc.get_page(page).get_layer(layer);

    let mut cursor_mm = 280.0;
    current_layer.use_text("Compliance Report", 18.0, Mm(15.0), Mm(cursor_mm), &font);
    cursor_mm -= 10.0;

    current_layer.use_text(
        format!("Report ID: {}  Generated: {}", report.metadata.report_id, report.metadata.generated_at.to_rfc3339()),
        10.0,
        Mm(15.0),
        Mm(cursor_mm),
        &font,
    );
    cursor_mm -= 8.0;

    current_layer.use_text(
        format!(
            "Total events: {}  Unique principals: {}  Integrity violations: {}",
            report.metadata.total_events, report.summary.unique_principals, report.summary.integrity_violations
        ),
        10.0,
        Mm(15.0),
        Mm(cursor_mm),
        &font,
    );
    cursor_mm -= 12.0;

    for event in report.events.iter().take(options.max_pdf_events) {
        if cursor_mm < 15.0 {
            break;
        }
        current_layer.use_text(
            format!(
                "{} | {} | {} | {:?}",
                event.timestamp.to_rfc3339(),
                event.action,
                event.principal_id.as_deref().unwrap_or("-"),
                event.status
            ),
            8.0,
            Mm(15.0),
            Mm(cursor_mm),
            &font,
        );
        cursor_mm -= 5.0;
    }

    let mut bytes = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut bytes);
        doc.save(&mut writer).map_err(|e| Error::export_encoding_failed(format!("pdf save failed: {e}")))?;
    }
    Ok(bytes)
}

fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzCompression::default());
            encoder.write_all(data).map_err(|e| Error::export_encoding_failed(format!("gzip write failed: {e}")))?;
            encoder.finish().map_err(|e| Error::export_encoding_failed(format!("gzip finish failed: {e}")))
        }
        CompressionKind::Zip => {
            let mut buffer = Vec::new();
            {
                let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buffer));
                let zip_options =
                    zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
                writer
                    .start_file("report", zip_options)
                    .map_err(|e| Error::export_encoding_failed(format!("zip start_file failed: {e}")))?;
                writer.write_all(data).map_err(|e| Error::export_encoding_failed(format!("zip write failed: {e}")))?;
                writer.finish().map_err(|e| Error::export_encoding_failed(format!("zip finish failed: {e}")))?;
            }
            Ok(buffer)
        }
    }
}

fn encrypt(data: &[u8], config: &EncryptionConfig) -> Result<(Vec<u8>, [u8; 12])> {
    let key = Key::<Aes256Gcm>::from_slice(&config.key);
    let cipher = Aes256Gcm::new(key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| Error::export_encoding_failed(format!("encryption failed: {e}")))?;

    let mut nonce_bytes = [0u8; 12];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    Ok((ciphertext, nonce_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportMetadata, ReportSummary, ReportType};
    use audit_core::model::{AuditEventBuilder, EventStatus};
    use audit_storage::ReportCriteria;
    use chrono::Utc;

    fn sample_report() -> ComplianceReport {
        let mut event = AuditEventBuilder::new(Utc::now(), "patient.record.view", EventStatus::Success)
            .principal_id("clinician-1")
            .outcome_description("viewed, contains \"quote\" and, comma")
            .build();
        event.hash = Some(audit_core::integrity::hash(&event));

        ComplianceReport {
            metadata: ReportMetadata {
                report_id: uuid::Uuid::new_v4(),
                report_type: ReportType::General,
                generated_at: Utc::now(),
                criteria: ReportCriteria::default(),
                total_events: 1,
                filtered_events: 1,
            },
            summary: ReportSummary::default(),
            events: vec![event],
        }
    }

    #[test]
    fn csv_export_quotes_fields_containing_commas_and_quotes() {
        let report = sample_report();
        let options = ExportOptions { format: ExportFormat::Csv, ..Default::default() };
        let result = export(&report, &options).unwrap();
        let text = String::from_utf8(result.data).unwrap();
        assert!(text.contains("\"viewed, contains \"\"quote\"\" and, comma\""));
    }

    #[test]
    fn xml_export_escapes_reserved_characters() {
        let mut report = sample_report();
        report.events[0].action = "a & b < c".to_string();
        let options = ExportOptions { format: ExportFormat::Xml, ..Default::default() };
        let result = export(&report, &options).unwrap();
        let text = String::from_utf8(result.data).unwrap();
        assert!(text.contains("a &amp; b &lt; c"));
    }

    #[test]
    fn json_export_omits_metadata_when_requested() {
        let report = sample_report();
        let options = ExportOptions { format: ExportFormat::Json, include_metadata: false, ..Default::default() };
        let result = export(&report, &options).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&result.data).unwrap();
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn checksum_changes_when_output_bytes_change() {
        let report_a = sample_report();
        let mut report_b = sample_report();
        report_b.events[0].action = "different.action".to_string();

        let options = ExportOptions { format: ExportFormat::Json, ..Default::default() };
        let result_a = export(&report_a, &options).unwrap();
        let result_b = export(&report_b, &options).unwrap();
        assert_ne!(result_a.checksum, result_b.checksum);
    }

    #[test]
    fn filename_reflects_applied_compression_and_encryption_suffixes() {
        let report = sample_report();
        let options = ExportOptions {
            format: ExportFormat::Json,
            compression: Some(CompressionKind::Gzip),
            encryption: Some(EncryptionConfig { key: [7u8; 32], key_id: "key-1".to_string() }),
            ..Default::default()
        };
        let result = export(&report, &options).unwrap();
        assert!(result.filename.ends_with(".json.gz.enc"));
        assert!(result.encryption.is_some());
    }
}
