// Validation Module - field-level validation with accumulated errors
use std::fmt;

mod validators;

pub use validators::{EmailValidator, FieldValidator, StringValidator};

/// Type alias for validation results
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error with detailed field-level errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Create a new, empty validation error
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Create with a single field error
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.add_field_error(field, message);
        err
    }

    /// Add a field-level error
    pub fn add_field_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Check if there are any errors
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get error count
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Get errors for a specific field
    pub fn field_errors(&self, field: &str) -> Vec<&FieldError> {
        self.errors.iter().filter(|e| e.field == field).collect()
    }

    /// Whether any error was recorded against `field`
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Merge another validation error into this one
    pub fn merge(&mut self, other: ValidationError) {
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "Validation error with no specific field errors"),
            [single] => write!(f, "Validation failed: {}: {}", single.field, single.message),
            many => {
                write!(f, "Validation failed with {} errors: ", many.len())?;
                for (i, error) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", error.field, error.message)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Individual field error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Accumulates field errors across several checks, then reports them at once
#[derive(Debug, Default)]
pub struct Validator {
    errors: ValidationError,
}

impl Validator {
    /// Create a new validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.add_field_error(field, message);
    }

    /// Validate a field with a specific validator
    pub fn validate_field<T, V>(&mut self, field: &str, value: &T, validator: &V)
    where
        T: ?Sized,
        V: FieldValidator<T> + ?Sized,
    {
        if let Err(msg) = validator.validate(value) {
            self.add_error(field, msg);
        }
    }

    /// Validate string is not empty
    pub fn validate_not_empty(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add_error(field, "cannot be empty");
        }
    }

    /// Validate minimum value
    pub fn validate_min<T>(&mut self, field: &str, value: T, min: T)
    where
        T: PartialOrd + fmt::Display,
    {
        if value < min {
            self.add_error(field, format!("must be at least {}", min));
        }
    }

    /// Check if validation has errors
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get error count
    pub fn error_count(&self) -> usize {
        self.errors.error_count()
    }

    /// Finalize and return result
    pub fn finalize(self) -> ValidationResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
