use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{FilterError, EX_TEMPFAIL};

/// What the delivery mechanism reported: its own exit code and whatever it
/// printed. The filter forwards both verbatim and never reinterprets.
#[derive(Debug, Clone)]
pub struct Submission {
    pub status: i32,
    pub output: String,
}

/// Hands a finished envelope (sender, recipients, message) to the delivery
/// mechanism.
pub trait MailTransport {
    fn submit(
        &self,
        sender: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<Submission, FilterError>;
}

/// Submission through the local sendmail binary, the way the MTA expects a
/// content filter to resubmit: `-G -i [-C dir] -f <sender> -- <rcpt>…` with
/// the message on stdin.
pub struct SendmailTransport {
    bin: PathBuf,
    config_dir: Option<PathBuf>,
}

impl SendmailTransport {
    pub fn new(bin: PathBuf, config_dir: Option<PathBuf>) -> Self {
        Self { bin, config_dir }
    }
}

impl MailTransport for SendmailTransport {
    fn submit(
        &self,
        sender: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<Submission, FilterError> {
        debug!(
            bin = %self.bin.display(),
            sender = %sender,
            recipients = %recipients.join(", "),
            "Submitting message"
        );

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-G").arg("-i");
        if let Some(dir) = &self.config_dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.arg("-f")
            .arg(sender)
            .arg("--")
            .args(recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits before draining stdin closes the pipe; its
            // exit status still decides the outcome.
            match stdin.write_all(message) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let out = child.wait_with_output()?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(Submission {
            // A signal-killed submission has no exit code; report it as a
            // temporary failure so the MTA retries.
            status: out.status.code().unwrap_or(EX_TEMPFAIL),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rcpts() -> Vec<String> {
        vec!["bob@example.com".to_string()]
    }

    #[test]
    fn test_successful_submission_reports_zero() {
        let transport = SendmailTransport::new(PathBuf::from("/bin/true"), None);
        let sub = transport
            .submit("alice@example.com", &rcpts(), b"body")
            .unwrap();
        assert_eq!(sub.status, 0);
    }

    #[test]
    fn test_exit_status_is_propagated_verbatim() {
        let transport = SendmailTransport::new(PathBuf::from("/bin/false"), None);
        let sub = transport
            .submit("alice@example.com", &rcpts(), b"body")
            .unwrap();
        assert_ne!(sub.status, 0);
    }

    #[test]
    fn test_missing_binary_is_a_submission_error() {
        let transport =
            SendmailTransport::new(PathBuf::from("/nonexistent/sendmail-bin"), None);
        let err = transport
            .submit("alice@example.com", &rcpts(), b"body")
            .unwrap_err();
        assert!(matches!(err, FilterError::Submission(_)));
    }
}
