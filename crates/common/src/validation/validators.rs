// Field Validators - Reusable validation components
use once_cell::sync::Lazy;

/// Trait for field validators
pub trait FieldValidator<T: ?Sized> {
    /// Validate a field value
    fn validate(&self, value: &T) -> Result<(), String>;
}

/// String validator with character-count bounds and an optional pattern
///
/// Lengths are counted in `char`s so accented names are measured the way a
/// user would count them.
#[derive(Debug, Clone, Default)]
pub struct StringValidator {
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<regex::Regex>,
    not_empty: bool,
}

impl StringValidator {
    /// Create a new string validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Require non-empty string
    pub fn not_empty(mut self) -> Self {
        self.not_empty = true;
        self
    }

    /// Set minimum length
    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    /// Set maximum length
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Set pattern to match
    pub fn pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.pattern = Some(regex::Regex::new(pattern)?);
        Ok(self)
    }
}

impl FieldValidator<str> for StringValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        let val = value.trim();
        let len = val.chars().count();

        if self.not_empty && val.is_empty() {
            return Err("Value cannot be empty".to_string());
        }

        if let Some(min) = self.min_length {
            if len < min {
                return Err(format!("Length must be at least {} characters", min));
            }
        }

        if let Some(max) = self.max_length {
            if len > max {
                return Err(format!("Length must not exceed {} characters", max));
            }
        }

        if let Some(ref pattern) = self.pattern {
            if !pattern.is_match(val) {
                return Err("Value contains invalid characters".to_string());
            }
        }

        Ok(())
    }
}

/// Static email regex pattern compiled once at first use
static EMAIL_REGEX: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("EMAIL_REGEX pattern is valid and well-formed")
});

/// Maximum address length accepted by SMTP
const MAX_EMAIL_LENGTH: usize = 254;

/// Email validator
#[derive(Debug, Clone, Default)]
pub struct EmailValidator;

impl EmailValidator {
    /// Create a new email validator
    pub fn new() -> Self {
        Self
    }
}

impl FieldValidator<str> for EmailValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        if value.len() > MAX_EMAIL_LENGTH {
            return Err(format!("Email must not exceed {} characters", MAX_EMAIL_LENGTH));
        }

        if !EMAIL_REGEX.is_match(value) {
            return Err("Invalid email format".to_string());
        }

        Ok(())
    }
}
