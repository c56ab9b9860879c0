//! Form input validation and free-text sanitization.
//!
//! Validators never fail: every check returns a `ValidationResult` that
//! carries a pass/fail flag and the human-readable messages to display.
//! An empty required field yields exactly one "is required" message and
//! skips the format checks for that field; otherwise format and length
//! violations are reported together.

pub mod product;

pub use product::{sanitize_product_form, validate_product_form, ProductForm};

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default maximum length for generic text fields
pub const DEFAULT_TEXT_MAX_LENGTH: usize = 100;

/// Maximum length of an email address (RFC 5321 path limit)
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Phone numbers must have between 8 and 15 characters once separators are stripped.
pub const MIN_PHONE_LENGTH: usize = 8;
pub const MAX_PHONE_LENGTH: usize = 15;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]+$").expect("email regex is valid")
});

static PHONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9][0-9]{1,14}$").expect("phone regex is valid"));

static SERIAL_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9_-]{1,50}$").expect("serial code regex is valid"));

static TEXT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\s.,\-_#]+$").expect("text regex is valid"));

static OBJECT_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").expect("object id regex is valid"));

/// Outcome of validating one field or a whole form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Append another result's errors after this one's
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.is_valid = self.is_valid && other.is_valid;
        self.errors.extend(other.errors);
        self
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

impl FromIterator<ValidationResult> for ValidationResult {
    fn from_iter<I: IntoIterator<Item = ValidationResult>>(iter: I) -> Self {
        iter.into_iter().fold(Self::valid(), Self::merge)
    }
}

fn required(field_name: &str) -> ValidationResult {
    ValidationResult::from_errors(vec![format!("{} is required", field_name)])
}

/// Trim and escape markup-significant characters.
///
/// Escaping is one-way: already-escaped input is escaped again.
pub fn sanitize_string(input: Option<&str>) -> String {
    let Some(input) = input else {
        return String::new();
    };
    let trimmed = input.trim();
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn validate_email(email: &str) -> ValidationResult {
    let email = email.trim();
    if email.is_empty() {
        return required("Email");
    }

    let mut errors = Vec::new();
    if !EMAIL_REGEX.is_match(email) {
        errors.push("Invalid email format".to_string());
    }
    if email.chars().count() > MAX_EMAIL_LENGTH {
        errors.push(format!("Email must be at most {} characters", MAX_EMAIL_LENGTH));
    }
    ValidationResult::from_errors(errors)
}

pub fn validate_phone(phone: &str) -> ValidationResult {
    validate_phone_field(phone, "Phone number")
}

/// Phone validation with a caller-supplied field label, for forms with
/// more than one phone number.
pub fn validate_phone_field(phone: &str, field_name: &str) -> ValidationResult {
    let cleaned: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();
    if cleaned.is_empty() {
        return required(field_name);
    }

    let mut errors = Vec::new();
    if !PHONE_REGEX.is_match(&cleaned) {
        errors.push(format!("{} has an invalid format", field_name));
    }
    let len = cleaned.chars().count();
    if !(MIN_PHONE_LENGTH..=MAX_PHONE_LENGTH).contains(&len) {
        errors.push(format!(
            "{} must be between {} and {} characters",
            field_name, MIN_PHONE_LENGTH, MAX_PHONE_LENGTH
        ));
    }
    ValidationResult::from_errors(errors)
}

pub fn validate_serial_code(code: &str) -> ValidationResult {
    let code = code.trim();
    if code.is_empty() {
        return required("Serial code");
    }
    if SERIAL_CODE_REGEX.is_match(code) {
        ValidationResult::valid()
    } else {
        ValidationResult::from_errors(vec![
            "Serial code may only contain uppercase letters, digits, hyphens and underscores (max 50)"
                .to_string(),
        ])
    }
}

pub fn validate_text(text: &str, field_name: &str, max_length: usize) -> ValidationResult {
    let text = text.trim();
    if text.is_empty() {
        return required(field_name);
    }

    let mut errors = Vec::new();
    if !TEXT_REGEX.is_match(text) {
        errors.push(format!("{} contains invalid characters", field_name));
    }
    if text.chars().count() > max_length {
        errors.push(format!(
            "{} must be at most {} characters",
            field_name, max_length
        ));
    }
    ValidationResult::from_errors(errors)
}

/// A 12-byte identifier encoded as 24 hex characters.
pub fn validate_object_id(id: &str, field_name: &str) -> ValidationResult {
    let id = id.trim();
    if id.is_empty() {
        return required(field_name);
    }
    if OBJECT_ID_REGEX.is_match(id) {
        ValidationResult::valid()
    } else {
        ValidationResult::from_errors(vec![format!("{} is not a valid identifier", field_name)])
    }
}
