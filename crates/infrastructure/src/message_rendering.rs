use grantwarden_application::NotificationPayload;
use serde_json::Value;

/// Renders the plain-text body shared by every transport.
///
/// Merge fields are listed as `key: value` lines in key order, strings
/// unquoted.
#[must_use]
pub(crate) fn render_text_body(payload: &NotificationPayload) -> String {
    let mut body = format!("{}\n", payload.subject_line);

    if !payload.fields.is_empty() {
        body.push('\n');
    }

    for (key, value) in &payload.fields {
        let rendered = match value {
            Value::String(text) => text.clone(),
            Value::Null => "-".to_owned(),
            other => other.to_string(),
        };
        body.push_str(format!("{key}: {rendered}\n").as_str());
    }

    body
}
