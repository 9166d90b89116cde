use thiserror::Error;

/// Permanent rejection; the MTA will bounce the message to the sender.
pub const EX_UNAVAILABLE: i32 = 69;

/// Temporary failure; the MTA keeps the message queued and retries later.
pub const EX_TEMPFAIL: i32 = 75;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("found neither subdomain addressing nor plus-extension in original subject")]
    NoAddressingTag,

    #[error("no valid sender address could be extracted from {0:?}")]
    MalformedAddress(String),

    #[error("required header {0} is missing")]
    MissingHeader(&'static str),

    #[error("message could not be parsed: {0}")]
    MalformedMessage(#[from] mailparse::MailParseError),

    #[error("sender ACL lookup failed: {0}")]
    AclUnavailable(String),

    #[error("submission could not be started: {0}")]
    Submission(#[from] std::io::Error),
}

impl FilterError {
    /// Maps the error to the exit code expected by the MTA's content-filter
    /// hook. Only a missing addressing tag is a permanent rejection; every
    /// other failure is temporary so the MTA re-presents the message.
    pub fn exit_code(&self) -> i32 {
        match self {
            FilterError::NoAddressingTag => EX_UNAVAILABLE,
            _ => EX_TEMPFAIL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tag_is_permanent() {
        assert_eq!(FilterError::NoAddressingTag.exit_code(), EX_UNAVAILABLE);
    }

    #[test]
    fn test_other_errors_are_temporary() {
        assert_eq!(
            FilterError::MalformedAddress("x".to_string()).exit_code(),
            EX_TEMPFAIL
        );
        assert_eq!(FilterError::MissingHeader("From").exit_code(), EX_TEMPFAIL);
        assert_eq!(
            FilterError::AclUnavailable("postmap".to_string()).exit_code(),
            EX_TEMPFAIL
        );
    }
}
