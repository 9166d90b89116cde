use chrono::Local;
use uuid::Uuid;

use crate::message::MailMessage;

/// Subject line of the policy bounce notification.
pub const BOUNCE_SUBJECT: &str = "Delivery failed: Unauthorized sender rewrite requested";

/// Display name used with the postmaster placeholder address.
pub const MAILER_DAEMON: &str = "MAILER DAEMON";

/// Fixed bounce explanation, parameterized by the original sender, the
/// derived sender and the authenticated identity.
pub const BOUNCE_TEMPLATE: &str = "\
!!!!! Unable to send message !!!!!

Based on the subject tags in your original subject,
you requested to rewrite the sender address from {original} to {derived}.
However, based on defined policies, you are not allowed to send mails as
{derived}, when authenticating as {authenticated}.

Please find your original email attached.
";

/// Everything the bounce composer needs, passed explicitly; no ambient
/// globals beyond the fixed templates above.
pub struct BounceParams<'a> {
    pub postmaster: &'a str,
    pub original_from: &'a str,
    pub derived_from: &'a str,
    pub authenticated_as: &'a str,
    /// Decoded subject of the original message, before tag stripping; used
    /// for the attachment filename.
    pub original_subject: &'a str,
}

/// Synthesizes the policy-denial notification: a fixed explanation plus the
/// entire original message attached unmodified.
pub fn build_bounce(original: &MailMessage, params: &BounceParams<'_>) -> MailMessage {
    let boundary = format!("----=_{}", Uuid::new_v4().simple());

    let text = BOUNCE_TEMPLATE
        .replace("{original}", params.original_from)
        .replace("{derived}", params.derived_from)
        .replace("{authenticated}", params.authenticated_as);

    let filename = attachment_name(params.original_subject);

    let headers = vec![
        (
            "From".to_string(),
            format!("{} <{}>", MAILER_DAEMON, params.postmaster),
        ),
        ("To".to_string(), params.original_from.to_string()),
        ("Date".to_string(), Local::now().to_rfc2822()),
        ("Subject".to_string(), BOUNCE_SUBJECT.to_string()),
        ("MIME-Version".to_string(), "1.0".to_string()),
        (
            "Content-Type".to_string(),
            format!("multipart/mixed; boundary=\"{}\"", boundary),
        ),
    ];

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: text/plain; charset=utf-8\r\n\r\n");
    body.extend_from_slice(text.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!("Content-Type: message/rfc822; name=\"{}\"\r\n", filename).as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(&original.to_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    MailMessage::new(headers, body)
}

fn attachment_name(subject: &str) -> String {
    let base = if subject.is_empty() { "message" } else { subject };
    format!("{}.eml", base.replace('"', "'"))
}
