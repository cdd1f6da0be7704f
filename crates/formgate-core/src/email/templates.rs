//! Built-in HTML email templates. Unknown or empty template names render the
//! confirmation template.

use std::fmt::Write as _;

use serde_json::Value;

use crate::models::Submission;
use crate::schema::FormSchema;

pub const CONFIRMATION_TEMPLATE: &str = "confirmation";
pub const WELCOME_TEMPLATE: &str = "internal-testing";

const STYLE: &str = "body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; } \
.container { max-width: 600px; margin: 0 auto; padding: 20px; } \
.header { background-color: #4CAF50; color: white; padding: 20px; text-align: center; } \
.content { padding: 20px; background-color: #f9f9f9; } \
.footer { padding: 20px; text-align: center; color: #666; } \
.data-table { width: 100%; border-collapse: collapse; margin: 20px 0; } \
.data-table th, .data-table td { border: 1px solid #ddd; padding: 8px; text-align: left; }";

pub fn render(name: &str, subject: &str, submission: &Submission, schema: &FormSchema) -> String {
    match name {
        WELCOME_TEMPLATE => render_welcome(subject, submission, schema),
        _ => render_confirmation(subject, submission, schema),
    }
}

fn render_confirmation(subject: &str, submission: &Submission, schema: &FormSchema) -> String {
    let form_name = escape(schema.display_name());
    let greeting = submission.text_field("name").map(escape).unwrap_or_else(|| "there".into());

    let mut rows = String::new();
    for (key, value) in &submission.data {
        let _ = write!(
            rows,
            "<tr><th>{}</th><td>{}</td></tr>",
            escape(key),
            escape(&display_value(value))
        );
    }

    let description = if schema.description.is_empty() {
        String::new()
    } else {
        format!("<p>{}</p>", escape(&schema.description))
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>{title}</title><style>{STYLE}</style></head>\n\
<body><div class=\"container\">\
<div class=\"header\"><h1>{form_name}</h1><p>Thank you for your submission!</p></div>\
<div class=\"content\">\
<p>Dear {greeting},</p>\
<p>We have successfully received your submission for {form_name}.</p>\
<h3>Submission Details:</h3><table class=\"data-table\">{rows}</table>\
<p><strong>Submission ID:</strong> {id}</p>\
<p><strong>Submitted at:</strong> {submitted}</p>\
{description}\
</div>\
<div class=\"footer\"><p>This is an automated message. Please do not reply to this email.</p></div>\
</div></body>\n</html>\n",
        title = escape(subject),
        id = escape(&submission.id),
        submitted = submission.submitted_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn render_welcome(subject: &str, submission: &Submission, schema: &FormSchema) -> String {
    let form_name = escape(schema.display_name());
    let greeting = submission.text_field("name").map(escape).unwrap_or_else(|| "there".into());
    let address = super::resolve_recipient(submission).map(escape).unwrap_or_default();

    let is_ios = submission
        .text_field("platform")
        .is_some_and(|platform| platform.eq_ignore_ascii_case("ios"));
    let platform_note = if is_ios {
        format!(
            "<li>You must use the email <strong>{address}</strong> to access TestFlight \
             (this should be your Apple ID email)</li>\
             <li>We'll send you the TestFlight invitation as soon as iOS testing is ready</li>"
        )
    } else {
        format!(
            "<li>You must use the email <strong>{address}</strong> to access the beta \
             through Google Play</li>"
        )
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>{title}</title><style>{STYLE}</style></head>\n\
<body><div class=\"container\">\
<div class=\"header\"><h1>Welcome to {form_name} Internal Testing!</h1></div>\
<div class=\"content\">\
<p>Hi {greeting},</p>\
<p><strong>Congratulations! You've been added to internal testing.</strong> \
This email is your invitation to access the beta version.</p>\
<h3>Important Notes:</h3><ul>{platform_note}\
<li>Beta versions may contain bugs - that's why we need your feedback!</li>\
<li>Updates are frequent, so check for new versions regularly</li></ul>\
<p>Thank you for helping us test!</p>\
</div>\
<div class=\"footer\"><p>This is an automated message. Please do not reply to this email.</p></div>\
</div></body>\n</html>\n",
        title = escape(subject),
    )
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Minimal HTML escaping for text and attribute positions.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
