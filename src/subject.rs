use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mailparse::parse_header;
use regex::Regex;
use tracing::debug;

use crate::error::FilterError;

/// An addressing directive extracted from the subject line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectTag {
    /// `[ext]` form. The tag is appended to the local part of the sender
    /// address as `+ext`; no authorization is required.
    PlusExtension { ext: String },
    /// `|ext|` form, where `ext` must itself look like an address. The tag
    /// turns into a subdomain prefix of the sender domain; authorization is
    /// required.
    Subdomain { ext: String },
}

/// Encoded-word dialect of a MIME-encoded subject segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Base64,
    QuotedPrintable,
}

/// Charset and dialect of the first encoded-word segment of a subject,
/// captured so a modified subject re-encodes the way the original was
/// encoded instead of with a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectEncoding {
    pub charset: String,
    pub dialect: Dialect,
}

/// A subject header decoded to text, with enough metadata to re-encode a
/// modified version losslessly.
#[derive(Debug, Clone)]
pub struct DecodedSubject {
    pub text: String,
    pub encoding: Option<SubjectEncoding>,
}

struct TagMatcher {
    pattern: &'static str,
    regex: OnceLock<Regex>,
    build: fn(String) -> SubjectTag,
}

impl TagMatcher {
    fn regex(&self) -> &Regex {
        self.regex
            .get_or_init(|| Regex::new(self.pattern).expect("Invalid tag pattern"))
    }
}

/// Decodes subject headers and extracts addressing tags.
///
/// The two dialects form a priority-ordered matcher chain: plus-extension is
/// tried first, subdomain addressing only when no bracket tag matched.
/// Adding a dialect means adding one entry to the chain.
///
/// Only the first tag occurrence on the (unfolded) subject line counts. When
/// a tag is stripped, a single space immediately following the closing
/// delimiter is consumed with it, so `"Hello [sales] World"` yields
/// `"Hello World"`.
pub struct SubjectCodec {
    matchers: [TagMatcher; 2],
    encoded_word: OnceLock<Regex>,
}

impl SubjectCodec {
    pub fn new() -> Self {
        Self {
            matchers: [
                TagMatcher {
                    pattern: r"^(?P<pre>[^\[]*)\[(?P<ext>[^\]]*)\] ?(?P<rest>.*)$",
                    regex: OnceLock::new(),
                    build: |ext| SubjectTag::PlusExtension { ext },
                },
                TagMatcher {
                    pattern: r"^(?P<pre>[^|]*)\|(?P<ext>[^|]+@[^|]+)\| ?(?P<rest>.*)$",
                    regex: OnceLock::new(),
                    build: |ext| SubjectTag::Subdomain { ext },
                },
            ],
            encoded_word: OnceLock::new(),
        }
    }

    /// Decodes a raw Subject header value: joins soft-wrapped lines, resolves
    /// MIME encoded-words, and records the charset/dialect of the first
    /// encoded segment for re-encoding.
    pub fn decode(&self, raw_value: &str) -> Result<DecodedSubject, FilterError> {
        // Header values may be soft-wrapped; matching happens on one line.
        let flat: String = raw_value
            .chars()
            .filter(|c| *c != '\r' && *c != '\n')
            .collect();

        let encoded_word = self.encoded_word.get_or_init(|| {
            Regex::new(r"=\?(?P<charset>[^?]+)\?(?P<dialect>[bBqQ])\?")
                .expect("Invalid encoded-word pattern")
        });
        let encoding = encoded_word.captures(&flat).map(|caps| SubjectEncoding {
            charset: caps["charset"].to_string(),
            dialect: match &caps["dialect"] {
                "b" | "B" => Dialect::Base64,
                _ => Dialect::QuotedPrintable,
            },
        });

        let line = format!("Subject: {}", flat);
        let (header, _) = parse_header(line.as_bytes())?;

        Ok(DecodedSubject {
            text: header.get_value(),
            encoding,
        })
    }

    /// Runs the matcher chain over the decoded subject text. Returns the
    /// extracted tag and the residual subject with the tag removed, or `None`
    /// when neither dialect matches.
    pub fn extract(&self, subject: &str) -> Option<(SubjectTag, String)> {
        for matcher in &self.matchers {
            if let Some(caps) = matcher.regex().captures(subject) {
                let tag = (matcher.build)(caps["ext"].to_string());
                let residual = format!("{}{}", &caps["pre"], &caps["rest"]);
                debug!(?tag, residual = %residual, "Subject tag matched");
                return Some((tag, residual));
            }
        }
        None
    }

    /// Re-encodes a (possibly modified) subject text using the encoding of
    /// the original header. Subjects that carried no encoded word are emitted
    /// verbatim. If the text no longer fits the recorded charset, UTF-8 is
    /// used instead, keeping the recorded dialect.
    pub fn encode(&self, text: &str, encoding: Option<&SubjectEncoding>) -> String {
        let Some(enc) = encoding else {
            return text.to_string();
        };

        let (bytes, charset): (Vec<u8>, &str) =
            match encoding_rs::Encoding::for_label(enc.charset.as_bytes()) {
                Some(e) => {
                    let (cow, _, had_errors) = e.encode(text);
                    if had_errors {
                        (text.as_bytes().to_vec(), "UTF-8")
                    } else {
                        (cow.into_owned(), enc.charset.as_str())
                    }
                }
                None => (text.as_bytes().to_vec(), "UTF-8"),
            };

        match enc.dialect {
            Dialect::Base64 => format!("=?{}?B?{}?=", charset, BASE64.encode(&bytes)),
            Dialect::QuotedPrintable => format!("=?{}?Q?{}?=", charset, q_encode(&bytes)),
        }
    }
}

/// RFC 2047 Q-encoding: space becomes underscore, a conservative set of
/// ASCII characters passes through, everything else is hex-escaped.
fn q_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b' ' => out.push('_'),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("={:02X}", b)),
        }
    }
    out
}
