//! Structured validation reporting.
//!
//! Request types derive `garde::Validate`; this module converts a garde
//! report into the field-level shape carried by `Error::validation`, so
//! both transports can enumerate which field failed which rule.

use serde::Serialize;

use crate::error::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    /// Dotted path to the offending field.
    pub field: String,
    pub message: String,
}

/// All failures for one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl From<&garde::Report> for ValidationReport {
    fn from(report: &garde::Report) -> Self {
        let mut out = ValidationReport::default();
        for (path, error) in report.iter() {
            let field = {
                let s = path.to_string();
                if s.is_empty() { "value".to_string() } else { s }
            };
            out.push(field, error.message().to_string());
        }
        out
    }
}

/// Run garde validation and convert failures to the gateway error shape.
pub fn validate<T>(value: &T) -> Result<(), Error>
where
    T: garde::Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| Error::validation(ValidationReport::from(&report)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(garde::Validate)]
    struct Probe {
        #[garde(length(min = 1))]
        name: String,
    }

    #[test]
    fn garde_report_converts_to_field_errors() {
        let err = validate(&Probe {
            name: String::new(),
        })
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        assert_eq!(err.fields().len(), 1);
        assert_eq!(err.fields()[0].field, "name");
    }

    #[test]
    fn valid_input_passes() {
        assert!(validate(&Probe {
            name: "ok".to_string(),
        })
        .is_ok());
    }
}
