use mailparse::parse_headers;

use crate::error::FilterError;

/// A mail message as an explicit ordered collection of header entries plus
/// an opaque body.
///
/// Headers keep their original order and on-the-wire value bytes (including
/// any folding), so an untouched message serializes back essentially as it
/// came in. Mutations go through [`replace`](Self::replace) and
/// [`remove_all`](Self::remove_all); header names always compare
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct MailMessage {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MailMessage {
    /// Parses a raw message into headers and body.
    pub fn parse(raw: &[u8]) -> Result<Self, FilterError> {
        let (parsed, body_offset) = parse_headers(raw)?;
        let headers = parsed
            .iter()
            .map(|h| {
                (
                    h.get_key(),
                    String::from_utf8_lossy(h.get_value_raw()).into_owned(),
                )
            })
            .collect();

        Ok(Self {
            headers,
            body: raw[body_offset..].to_vec(),
        })
    }

    /// Builds a message from scratch, for synthesized notifications.
    pub fn new(headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Returns the first header value matching `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes every header matching `name`, returning how many were removed.
    pub fn remove_all(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.headers.len()
    }

    /// Replaces the first header matching `name` in place, keeping its
    /// position in the header list. If no such header exists, the header is
    /// inserted at the front.
    pub fn replace(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self
                .headers
                .insert(0, (name.to_string(), value.to_string())),
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the message: headers in order, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let headers_len: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + 2 + v.len() + 2)
            .sum();

        let mut out = Vec::with_capacity(headers_len + 2 + self.body.len());
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MailMessage {
        MailMessage::parse(
            b"From: Alice <alice@example.com>\r\n\
              To: bob@example.com\r\n\
              Subject: Hello\r\n\
              DKIM-Signature: v=1; a=rsa-sha256\r\n\
              \r\n\
              Body text\r\n",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_preserves_order() {
        let msg = sample();
        assert_eq!(msg.headers().len(), 4);
        assert_eq!(msg.headers()[0].0, "From");
        assert_eq!(msg.headers()[2].0, "Subject");
        assert_eq!(msg.body(), b"Body text\r\n");
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let msg = sample();
        assert_eq!(msg.get("subject"), Some("Hello"));
        assert_eq!(msg.get("SUBJECT"), Some("Hello"));
        assert_eq!(msg.get("Return-Path"), None);
    }

    #[test]
    fn test_remove_all() {
        let mut msg = sample();
        assert_eq!(msg.remove_all("dkim-signature"), 1);
        assert_eq!(msg.get("DKIM-Signature"), None);
        assert_eq!(msg.remove_all("dkim-signature"), 0);
        assert_eq!(msg.headers().len(), 3);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut msg = sample();
        msg.replace("subject", "Changed");
        assert_eq!(msg.headers()[2], ("Subject".to_string(), "Changed".to_string()));
    }

    #[test]
    fn test_replace_inserts_when_absent() {
        let mut msg = sample();
        msg.replace("Return-Path", "<alice@example.com>");
        assert_eq!(msg.headers()[0].0, "Return-Path");
        assert_eq!(msg.get("Return-Path"), Some("<alice@example.com>"));
    }

    #[test]
    fn test_serialization_round_trip() {
        let msg = sample();
        let bytes = msg.to_bytes();
        let reparsed = MailMessage::parse(&bytes).unwrap();
        assert_eq!(reparsed.headers(), msg.headers());
        assert_eq!(reparsed.body(), msg.body());
    }

    #[test]
    fn test_folded_header_survives_round_trip() {
        let raw = b"Subject: a very\r\n long subject\r\n\r\nbody";
        let msg = MailMessage::parse(raw).unwrap();
        let reparsed = MailMessage::parse(&msg.to_bytes()).unwrap();
        assert_eq!(msg.get("Subject"), reparsed.get("Subject"));
    }
}
