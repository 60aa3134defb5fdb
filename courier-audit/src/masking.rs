//! Redaction of request and response bodies before they reach an audit sink

use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use serde_json::Value;

/// Fields masked by default (matched case-insensitively, by exact name)
pub const DEFAULT_MASKED_FIELDS: &[&str] =
    &["password", "token", "authorization", "ssn", "creditCard"];

/// Replacement for masked values
pub const DEFAULT_MASK_TOKEN: &str = "***";

/// Appended to summaries cut at the length cap
pub const TRUNCATION_MARKER: &str = "... [TRUNCATED]";

/// Default length cap for a body summary, in bytes
pub const DEFAULT_MAX_LENGTH: usize = 1000;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@([A-Za-z0-9.-]+\.[A-Za-z]{2,})\b").expect("valid email regex")
});

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+\d{1,3}\s?\d{3,14}\b|\b\d{3}[-. ]?\d{3}[-. ]?\d{4}\b").expect("valid phone regex")
});

static SSN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid ssn regex"));

static CREDIT_CARD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").expect("valid card regex")
});

/// Errors raised while building a body summary
#[derive(Debug, thiserror::Error)]
pub enum RedactionError {
    #[error("body is not UTF-8 text ({len} bytes)")]
    NotText { len: usize },

    #[error("failed to re-serialize masked body: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Data masking configuration
#[derive(Debug, Clone)]
pub struct MaskingConfig {
    /// Field names whose values are replaced wholesale
    pub masked_fields: Vec<String>,

    /// Replacement token
    pub mask_token: String,

    /// Mask email local-parts
    pub mask_emails: bool,

    /// Mask phone numbers
    pub mask_phones: bool,

    /// Mask SSNs
    pub mask_ssn: bool,

    /// Mask payment card numbers (last four digits stay visible)
    pub mask_credit_cards: bool,

    /// Summary length cap in bytes, excluding the marker
    pub max_length: usize,

    /// Appended when a summary is truncated
    pub truncation_marker: String,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            masked_fields: DEFAULT_MASKED_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mask_token: DEFAULT_MASK_TOKEN.to_string(),
            mask_emails: true,
            mask_phones: true,
            mask_ssn: true,
            mask_credit_cards: true,
            max_length: DEFAULT_MAX_LENGTH,
            truncation_marker: TRUNCATION_MARKER.to_string(),
        }
    }
}

impl MaskingConfig {
    /// Create a new masking configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the masked field set
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.masked_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Add a field to mask
    pub fn add_field(mut self, field: impl Into<String>) -> Self {
        self.masked_fields.push(field.into());
        self
    }

    /// Set the replacement token
    pub fn mask_token(mut self, token: impl Into<String>) -> Self {
        self.mask_token = token.into();
        self
    }

    /// Set whether to mask emails
    pub fn mask_emails(mut self, mask: bool) -> Self {
        self.mask_emails = mask;
        self
    }

    /// Set whether to mask phone numbers
    pub fn mask_phones(mut self, mask: bool) -> Self {
        self.mask_phones = mask;
        self
    }

    /// Set the summary length cap
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = max;
        self
    }

    /// Whether `key` names a masked field
    pub fn is_masked_field(&self, key: &str) -> bool {
        self.masked_fields
            .iter()
            .any(|field| field.eq_ignore_ascii_case(key))
    }
}

/// Scrub PII shapes from free text
///
/// Cards are handled first so their digit groups are not mistaken for phone
/// numbers.
///
/// # Examples
///
/// ```
/// use courier_audit::*;
///
/// let config = MaskingConfig::default();
/// let masked = mask_string("mail alice@example.com, ssn 123-45-6789", &config);
/// assert_eq!(masked, "mail ***@example.com, ssn ***-**-****");
/// ```
pub fn mask_string(input: &str, config: &MaskingConfig) -> String {
    let mut result = input.to_string();

    if config.mask_credit_cards {
        result = CREDIT_CARD_REGEX
            .replace_all(&result, |caps: &Captures| {
                let digits: String = caps[0].chars().filter(char::is_ascii_digit).collect();
                mask_value(&digits, '*', 4)
            })
            .into_owned();
    }

    if config.mask_ssn {
        result = SSN_REGEX.replace_all(&result, "***-**-****").into_owned();
    }

    if config.mask_phones {
        result = PHONE_REGEX
            .replace_all(&result, config.mask_token.as_str())
            .into_owned();
    }

    if config.mask_emails {
        result = EMAIL_REGEX
            .replace_all(&result, |caps: &Captures| {
                format!("{}@{}", config.mask_token, &caps[1])
            })
            .into_owned();
    }

    result
}

/// Mask a value, leaving the last `show_last` characters visible
///
/// # Examples
///
/// ```
/// use courier_audit::*;
///
/// assert_eq!(mask_value("4111111111111111", '*', 4), "************1111");
/// assert_eq!(mask_value("abc", '*', 4), "***");
/// ```
pub fn mask_value(value: &str, mask_char: char, show_last: usize) -> String {
    let len = value.chars().count();
    if len <= show_last {
        return mask_char.to_string().repeat(len);
    }

    let masked_len = len - show_last;
    let visible: String = value.chars().skip(masked_len).collect();
    format!("{}{}", mask_char.to_string().repeat(masked_len), visible)
}

/// Mask sensitive fields in JSON
///
/// Any value under a masked key becomes the mask token, whatever its type.
/// Remaining strings and numbers are scrubbed for PII shapes; a number that
/// matches one becomes a masked string.
pub fn mask_json(value: &Value, config: &MaskingConfig) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let masked = if config.is_masked_field(key) {
                        Value::String(config.mask_token.clone())
                    } else {
                        mask_json(val, config)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(|v| mask_json(v, config)).collect()),
        Value::String(s) => Value::String(mask_string(s, config)),
        Value::Number(n) => {
            let digits = n.to_string();
            let masked = mask_string(&digits, config);
            if masked == digits {
                value.clone()
            } else {
                Value::String(masked)
            }
        }
        _ => value.clone(),
    }
}

/// Cut `input` to at most `max` bytes on a char boundary and append `marker`
pub fn truncate(input: &str, max: usize, marker: &str) -> String {
    if input.len() <= max {
        return input.to_string();
    }

    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &input[..end], marker)
}

/// Compiled redaction rules for one [`MaskingConfig`]
///
/// The field pattern used on non-JSON text is compiled once here rather than
/// per body.
#[derive(Debug, Clone)]
pub struct Redactor {
    config: MaskingConfig,
    field_pattern: Option<Regex>,
}

impl Redactor {
    /// Compile the rules for `config`
    pub fn new(config: MaskingConfig) -> Self {
        let field_pattern = if config.masked_fields.is_empty() {
            None
        } else {
            let names = config
                .masked_fields
                .iter()
                .map(|f| regex::escape(f))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!(r#"("?\b(?:{names})\b"?\s*[:=]\s*)("(?:[^"\\]|\\.)*"|[^\s&,;"}}]+)"#);
            match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(error = %e, "Masked field pattern rejected, text bodies keep only PII masking");
                    None
                }
            }
        };

        Self {
            config,
            field_pattern,
        }
    }

    /// The rules in effect
    pub fn config(&self) -> &MaskingConfig {
        &self.config
    }

    /// Mask `key=value` and `"key":"value"` pairs and PII shapes in free text
    pub fn mask_text(&self, input: &str) -> String {
        let fields_masked = match &self.field_pattern {
            Some(re) => re
                .replace_all(input, |caps: &Captures| {
                    if caps[2].starts_with('"') {
                        format!("{}\"{}\"", &caps[1], self.config.mask_token)
                    } else {
                        format!("{}{}", &caps[1], self.config.mask_token)
                    }
                })
                .into_owned(),
            None => input.to_string(),
        };
        mask_string(&fields_masked, &self.config)
    }

    /// Mask query parameters of `uri` whose names are masked fields
    ///
    /// Other parameter values are scrubbed for PII shapes. The path and any
    /// fragment are left alone.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_audit::*;
    ///
    /// let redactor = Redactor::default();
    /// assert_eq!(
    ///     redactor.mask_uri("https://api.local/x?token=abc&page=2"),
    ///     "https://api.local/x?token=***&page=2"
    /// );
    /// ```
    pub fn mask_uri(&self, uri: &str) -> String {
        let Some((base, rest)) = uri.split_once('?') else {
            return uri.to_string();
        };
        let (query, fragment) = match rest.split_once('#') {
            Some((query, fragment)) => (query, Some(fragment)),
            None => (rest, None),
        };

        let masked: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if self.config.is_masked_field(key) => {
                    format!("{key}={}", self.config.mask_token)
                }
                Some((key, value)) => format!("{key}={}", mask_string(value, &self.config)),
                None => pair.to_string(),
            })
            .collect();

        let mut result = format!("{base}?{}", masked.join("&"));
        if let Some(fragment) = fragment {
            result.push('#');
            result.push_str(fragment);
        }
        result
    }

    /// Build the redacted, length-capped summary of a body
    ///
    /// JSON bodies are masked structurally, any other UTF-8 text by pattern.
    /// Binary bodies are rejected with [`RedactionError::NotText`].
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_audit::*;
    ///
    /// let redactor = Redactor::new(MaskingConfig::default().fields(["password"]));
    /// let summary = redactor.summarize(br#"{"password":"abc123","user":"x"}"#).unwrap();
    /// assert!(summary.contains(r#""password":"***""#));
    /// assert!(summary.contains(r#""user":"x""#));
    /// ```
    pub fn summarize(&self, body: &[u8]) -> Result<String, RedactionError> {
        if body.is_empty() {
            return Ok(String::new());
        }

        let text = std::str::from_utf8(body).map_err(|_| RedactionError::NotText { len: body.len() })?;

        let masked = match serde_json::from_str::<Value>(text) {
            Ok(json) => serde_json::to_string(&mask_json(&json, &self.config))?,
            Err(_) => self.mask_text(text),
        };

        Ok(truncate(
            &masked,
            self.config.max_length,
            &self.config.truncation_marker,
        ))
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(MaskingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("secret123", '*', 3), "******123");
        assert_eq!(mask_value("abc", '*', 3), "***");
        assert_eq!(mask_value("ab", '*', 3), "**");
    }

    #[test]
    fn test_mask_email_keeps_domain() {
        let config = MaskingConfig::default();
        let masked = mask_string("Email: user.name@example.com", &config);
        assert_eq!(masked, "Email: ***@example.com");
    }

    #[test]
    fn test_mask_phone() {
        let config = MaskingConfig::default();
        let masked = mask_string("Phone: 123-456-7890", &config);
        assert_eq!(masked, "Phone: ***");
    }

    #[test]
    fn test_mask_international_phone() {
        let config = MaskingConfig::default();
        assert_eq!(mask_string("call +44 7911123456 now", &config), "call *** now");
        assert_eq!(mask_string("call +15551234567", &config), "call ***");
    }

    #[test]
    fn test_mask_card_keeps_last_four() {
        let config = MaskingConfig::default();
        let masked = mask_string("card 4111 1111 1111 1234 ok", &config);
        assert_eq!(masked, "card ************1234 ok");
    }

    #[test]
    fn test_mask_ssn() {
        let config = MaskingConfig::default();
        assert_eq!(mask_string("123-45-6789", &config), "***-**-****");
    }

    #[test]
    fn test_field_match_is_exact_and_case_insensitive() {
        let config = MaskingConfig::default();
        assert!(config.is_masked_field("PASSWORD"));
        assert!(config.is_masked_field("creditcard"));
        assert!(!config.is_masked_field("password_hint"));
    }

    #[test]
    fn test_mask_json_any_value_type() {
        let config = MaskingConfig::default();
        let data = json!({
            "username": "alice",
            "token": {"value": "abc"},
            "Password": 12345,
            "items": [{"ssn": "123-45-6789"}]
        });

        let masked = mask_json(&data, &config);
        assert_eq!(masked["username"], "alice");
        assert_eq!(masked["token"], "***");
        assert_eq!(masked["Password"], "***");
        assert_eq!(masked["items"][0]["ssn"], "***");
    }

    #[test]
    fn test_numeric_pii_masked() {
        let redactor = Redactor::default();
        let summary = redactor
            .summarize(br#"{"card":4111111111111111,"phone":5551234567,"qty":3,"note":"4111111111111111"}"#)
            .unwrap();

        assert!(!summary.contains("4111111111111111"), "{summary}");
        assert!(!summary.contains("5551234567"), "{summary}");
        assert!(summary.contains(r#""card":"************1111""#));
        assert!(summary.contains(r#""phone":"***""#));
        assert!(summary.contains(r#""note":"************1111""#));
        assert!(summary.contains(r#""qty":3"#));
    }

    #[test]
    fn test_mask_uri_query() {
        let redactor = Redactor::default();

        assert_eq!(
            redactor.mask_uri("https://api.local/users?Token=abc123&page=2&password=s3cret"),
            "https://api.local/users?Token=***&page=2&password=***"
        );
        assert_eq!(
            redactor.mask_uri("http://svc/x?card=4111111111111111&flag#top"),
            "http://svc/x?card=************1111&flag#top"
        );
        assert_eq!(redactor.mask_uri("http://svc/plain/path"), "http://svc/plain/path");
    }

    #[test]
    fn test_summarize_password_example() {
        let redactor = Redactor::new(MaskingConfig::default().fields(["password"]));
        let summary = redactor
            .summarize(br#"{"password":"abc123","user":"x"}"#)
            .unwrap();

        assert!(summary.contains(r#""password":"***""#));
        assert!(summary.contains(r#""user":"x""#));
        assert!(!summary.contains("abc123"));
    }

    #[test]
    fn test_summarize_form_body() {
        let redactor = Redactor::default();
        let summary = redactor
            .summarize(b"user=alice&password=hunter2&Token=xyz")
            .unwrap();
        assert_eq!(summary, "user=alice&password=***&Token=***");
    }

    #[test]
    fn test_summarize_quoted_pairs_in_text() {
        let redactor = Redactor::default();
        let summary = redactor
            .summarize(br#"not json: "password": "p@ss\"word", next"#)
            .unwrap();
        assert_eq!(summary, r#"not json: "password": "***", next"#);
    }

    #[test]
    fn test_truncation_bound() {
        let redactor = Redactor::new(MaskingConfig::default().max_length(10));
        let summary = redactor.summarize("x".repeat(50).as_bytes()).unwrap();

        assert!(summary.ends_with(TRUNCATION_MARKER));
        assert_eq!(summary.len(), 10 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let out = truncate("ééééé", 3, "~");
        assert_eq!(out, "é~");
        assert!(out.len() <= 3 + 1);
    }

    #[test]
    fn test_binary_body_rejected() {
        let redactor = Redactor::default();
        let err = redactor.summarize(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, RedactionError::NotText { len: 3 }));
    }
}
