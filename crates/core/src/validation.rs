//! Boundary validation of typed requests
//!
//! Runs before any backend is touched. Every problem is reported at once as a
//! [`ValidationError`] listing the offending fields.

use clientkey_common::validation::{
    EmailValidator, FieldValidator, StringValidator, ValidationResult, Validator,
};
use clientkey_domain::{AddActivityRequest, AddClientRequest, UpdateClientRequest};
use once_cell::sync::Lazy;

const NAME_PATTERN: &str = r"^[A-Za-zÀ-ÿ\s]+$";

static NAME_VALIDATOR: Lazy<StringValidator> = Lazy::new(|| {
    StringValidator::new()
        .not_empty()
        .min_length(2)
        .max_length(100)
        .pattern(NAME_PATTERN)
        .expect("NAME_PATTERN is a valid regex")
});

/// Brazilian mobile number: 11 digits once punctuation is stripped, the third
/// being the mobile prefix `9`
#[derive(Debug, Clone, Copy, Default)]
pub struct WhatsappValidator;

impl FieldValidator<str> for WhatsappValidator {
    fn validate(&self, value: &str) -> Result<(), String> {
        let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
        if digits.len() != 11 {
            return Err("must have 11 digits".to_string());
        }
        if digits[2] != '9' {
            return Err("mobile number must start with 9".to_string());
        }
        Ok(())
    }
}

fn check_email(v: &mut Validator, field: &str, email: &str) {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        v.add_error(field, "cannot be empty");
    } else {
        v.validate_field(field, email.as_str(), &EmailValidator::new());
    }
}

fn check_whatsapp(v: &mut Validator, whatsapp: Option<&str>) {
    if let Some(number) = whatsapp.filter(|n| !n.trim().is_empty()) {
        v.validate_field("whatsapp", number, &WhatsappValidator);
    }
}

pub fn validate_add_client(request: &AddClientRequest) -> ValidationResult<()> {
    let mut v = Validator::new();
    v.validate_field("name", request.name.as_str(), &*NAME_VALIDATOR);
    check_email(&mut v, "email", &request.email);
    check_whatsapp(&mut v, request.whatsapp.as_deref());
    v.finalize()
}

pub fn validate_update_client(id: &str, request: &UpdateClientRequest) -> ValidationResult<()> {
    let mut v = Validator::new();
    v.validate_not_empty("id", id);
    if request.is_empty() {
        v.add_error("changes", "nothing to update");
    }
    if let Some(name) = &request.name {
        v.validate_field("name", name.as_str(), &*NAME_VALIDATOR);
    }
    if let Some(email) = &request.email {
        check_email(&mut v, "email", email);
    }
    check_whatsapp(&mut v, request.whatsapp.as_deref());
    v.finalize()
}

pub fn validate_add_activity(request: &AddActivityRequest) -> ValidationResult<()> {
    let mut v = Validator::new();
    v.validate_not_empty("client_id", &request.client_id);
    v.validate_not_empty("client_name", &request.client_name);
    check_email(&mut v, "client_email", &request.client_email);
    v.validate_min("points", request.points, 0);
    if let Some(details) = &request.details {
        if !details.is_object() && !details.is_null() {
            v.add_error("details", "must be an object");
        }
    }
    v.finalize()
}
