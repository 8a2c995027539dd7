//! Request body validation.

use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::AppError;

/// Validate a request body, mapping failures to `AppError::InvalidRequest`.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), AppError> {
    body.validate()
        .map_err(|e| AppError::InvalidRequest(format_validation_errors(e)))
}

/// Flatten field errors into `"field: message; field: message"`.
///
/// Nested structs and list items are prefixed with their path, e.g.
/// `personality_traits[0].strength`.
fn format_validation_errors(errors: ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_messages("", &errors, &mut messages);
    // HashMap iteration order is random
    messages.sort();
    messages.join("; ")
}

fn collect_messages(prefix: &str, errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    let msg = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid value ({})", e.code));
                    out.push(format!("{path}: {msg}"));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_messages(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_messages(&format!("{path}[{index}]"), inner, out);
                }
            }
        }
    }
}
