//! Result Store
//!
//! Persistence for enrichment outcomes: normalized phone/email tables,
//! lead-level rollups, the legacy single-row compatibility table, the
//! provider-call billing ledger and the enrichment audit log.

pub mod audit;
pub mod contacts;
pub mod leads;

pub use self::audit::{spawn_audit_logger, AuditEntry, ProviderCallRecord};
pub use self::contacts::ContactSummary;
pub use self::leads::Lead;
