use serde::Deserialize;

/// A single line of terraform's `-json` output stream.
#[derive(Debug, Deserialize)]
pub struct TfJsonLine {
    #[serde(rename = "@level")]
    pub level: Option<String>,
    #[serde(rename = "@message")]
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub line_type: Option<String>,
    pub changes: Option<ChangeSummary>,
    pub diagnostic: Option<Diagnostic>,
}

/// Aggregate counts from a `change_summary` record.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct ChangeSummary {
    #[serde(default)]
    pub add: u64,
    #[serde(default)]
    pub change: u64,
    #[serde(default)]
    pub remove: u64,
}

/// A terraform diagnostic (error/warning).
#[derive(Debug, Deserialize)]
pub struct Diagnostic {
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub detail: Option<String>,
}

/// Locate the change-summary record in plan output. Plan emits exactly one;
/// `None` means the output stream is not something we understand.
pub fn find_change_summary(lines: &[String]) -> Option<ChangeSummary> {
    for line in lines {
        if let Ok(parsed) = serde_json::from_str::<TfJsonLine>(line) {
            if parsed.line_type.as_deref() == Some("change_summary") {
                return Some(parsed.changes.unwrap_or_default());
            }
        }
    }
    None
}

/// Extract error diagnostics from terraform JSON output.
pub fn extract_errors(lines: &[String]) -> Vec<String> {
    let mut errors = Vec::new();

    for line in lines {
        if let Ok(parsed) = serde_json::from_str::<TfJsonLine>(line) {
            if let Some(diag) = &parsed.diagnostic {
                if diag.severity.as_deref() == Some("error") {
                    let msg = diag
                        .summary
                        .as_deref()
                        .unwrap_or("Unknown error")
                        .to_string();
                    errors.push(msg);
                }
            }
        }
    }

    errors
}
