pub mod export;
pub mod report;

pub use export::{export, CompressionKind, EncryptionConfig, ExportFormat, ExportOptions, ExportResult};
pub use report::{ComplianceReport, ComplianceReporter, IntegrityVerificationReport, ReportSummary, ReportType};
