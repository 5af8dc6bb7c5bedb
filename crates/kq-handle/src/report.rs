//! Structured error objects for API callers.

use serde::Serialize;

use kq_ir::Error;

/// `{type, message, context}` as handed to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    /// Offending store key, or the kind of a format error without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ErrorReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Conversion of errors into reports.
pub trait Report {
    fn report(&self) -> ErrorReport;
}

impl Report for Error {
    fn report(&self) -> ErrorReport {
        let context = match self {
            Error::Format { key: Some(key), .. } => Some(key.clone()),
            Error::Format { error, key: None } => Some(error.kind().to_string()),
            _ => None,
        };
        ErrorReport {
            kind: self.kind().as_str(),
            message: self.to_string(),
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_ir::FormatError;

    #[test]
    fn format_errors_name_key_or_kind() {
        let at_key = Error::format_at("p_connections.json", FormatError::Json("eof".into()));
        let report = at_key.report();
        assert_eq!(report.kind, "FormatError");
        assert_eq!(report.context.as_deref(), Some("p_connections.json"));

        let bare: Error = FormatError::BindingDepth { limit: 16 }.into();
        assert_eq!(bare.report().context.as_deref(), Some("binding_depth"));
    }

    #[test]
    fn argument_errors_have_no_context() {
        let report = Error::argument("buffer size 0").report();
        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["type"], "ArgumentError");
        assert!(json["message"].as_str().unwrap().contains("buffer size 0"));
        assert!(json.get("context").is_none());
    }
}
