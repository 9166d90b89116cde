use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::FilterError;
use crate::subject::SubjectTag;

/// Outcome of an address rewrite: the new From header value (display name
/// preserved) and the plain `local@domain` address extracted from it, used
/// as the envelope sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub from_value: String,
    pub sender: String,
}

/// Derives the new sender identity from the original From header value and
/// an extracted subject tag.
///
/// Both transforms are textual substitutions inside the header value, which
/// may carry a display name; the envelope sender is whatever syntactically
/// valid address can be extracted from the substitution result.
pub struct AddressRewriter {
    smtp_addr: OnceLock<Regex>,
    domain: OnceLock<Regex>,
}

impl AddressRewriter {
    pub fn new() -> Self {
        Self {
            smtp_addr: OnceLock::new(),
            domain: OnceLock::new(),
        }
    }

    pub fn rewrite(&self, from_value: &str, tag: &SubjectTag) -> Result<Rewrite, FilterError> {
        let new_from = match tag {
            // user@example.com + [sales] -> user+sales@example.com
            SubjectTag::PlusExtension { ext } => {
                from_value.replacen('@', &format!("+{}@", ext), 1)
            }
            // user@example.com + |team@x| -> user@team.example.com
            SubjectTag::Subdomain { ext } => {
                let label = ext.split('@').next().unwrap_or_default();
                let domain = self.domain.get_or_init(|| {
                    Regex::new(r"@(?P<dom>[^>\s]+)").expect("Invalid domain pattern")
                });
                domain
                    .replacen(from_value, 1, |caps: &Captures| {
                        format!("@{}.{}", label, &caps["dom"])
                    })
                    .into_owned()
            }
        };

        let sender = self
            .extract_smtp_addr(&new_from)
            .ok_or_else(|| FilterError::MalformedAddress(new_from.clone()))?;

        debug!(from = %new_from, sender = %sender, "Derived rewritten sender");
        Ok(Rewrite {
            from_value: new_from,
            sender,
        })
    }

    /// Pulls the first syntactically valid SMTP address out of a header
    /// value.
    fn extract_smtp_addr(&self, text: &str) -> Option<String> {
        let smtp_addr = self.smtp_addr.get_or_init(|| {
            Regex::new(r"(?i)[a-z0-9.\-+_]+@[a-z0-9.\-+_]+\.[a-z]+").expect("Invalid address pattern")
        });
        smtp_addr.find(text).map(|m| m.as_str().to_string())
    }
}
