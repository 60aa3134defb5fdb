//! Audit configuration

use crate::masking::{DEFAULT_MASK_TOKEN, DEFAULT_MASKED_FIELDS, DEFAULT_MAX_LENGTH, MaskingConfig};
use serde::{Deserialize, Serialize};

/// Default capacity of the pipeline queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Audit settings, as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether audit records are produced at all
    pub enabled: bool,

    /// Capture a summary of request bodies
    pub log_request_body: bool,

    /// Capture a summary of response bodies
    pub log_response_body: bool,

    /// Field names whose values are masked (case-insensitive)
    pub masked_fields: Vec<String>,

    /// Replacement token for masked values
    pub mask_token: String,

    /// Scrub emails, phone numbers, SSNs and card numbers in free text
    pub mask_pii: bool,

    /// Summary length cap in bytes
    pub max_body_length: usize,

    /// Events buffered before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_request_body: true,
            log_response_body: true,
            masked_fields: DEFAULT_MASKED_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mask_token: DEFAULT_MASK_TOKEN.to_string(),
            mask_pii: true,
            max_body_length: DEFAULT_MAX_LENGTH,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl AuditConfig {
    /// Masking rules derived from this config
    pub fn masking(&self) -> MaskingConfig {
        MaskingConfig {
            masked_fields: self.masked_fields.clone(),
            mask_token: self.mask_token.clone(),
            mask_emails: self.mask_pii,
            mask_phones: self.mask_pii,
            mask_ssn: self.mask_pii,
            mask_credit_cards: self.mask_pii,
            max_length: self.max_body_length,
            ..MaskingConfig::default()
        }
    }
}
