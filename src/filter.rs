use tracing::{info, warn};

use crate::acl::{is_authorized, SenderAcl};
use crate::bounce::{build_bounce, BounceParams};
use crate::error::FilterError;
use crate::message::MailMessage;
use crate::rewrite::AddressRewriter;
use crate::sendmail::{MailTransport, Submission};
use crate::subject::{SubjectCodec, SubjectTag};

/// Per-invocation parameters handed in by the MTA's content-filter hook.
pub struct FilterContext<'a> {
    pub authenticated_as: &'a str,
    pub recipients: &'a [String],
    pub postmaster: &'a str,
}

/// Runs the whole pipeline over one message: parse the subject tag, derive
/// the new sender, authorize it where required, then resubmit either the
/// rewritten message or a policy bounce.
///
/// Returns whatever the submission mechanism reported; the caller propagates
/// its status as the process exit code.
pub fn run_filter(
    mut msg: MailMessage,
    ctx: &FilterContext<'_>,
    acl: &dyn SenderAcl,
    transport: &dyn MailTransport,
) -> Result<Submission, FilterError> {
    let codec = SubjectCodec::new();
    let rewriter = AddressRewriter::new();

    // A message without a subject cannot carry an addressing tag.
    let raw_subject = msg
        .get("Subject")
        .ok_or(FilterError::NoAddressingTag)?
        .to_string();
    let from_value = msg
        .get("From")
        .ok_or(FilterError::MissingHeader("From"))?
        .to_string();

    let decoded = codec.decode(&raw_subject)?;
    let (tag, residual) = codec
        .extract(&decoded.text)
        .ok_or(FilterError::NoAddressingTag)?;

    let rewrite = rewriter.rewrite(&from_value, &tag)?;

    let authorized = match &tag {
        // Sub-addressing keeps the authenticated local part; only subdomain
        // rewrites can impersonate another identity and need the ACL.
        SubjectTag::PlusExtension { .. } => true,
        SubjectTag::Subdomain { .. } => {
            is_authorized(acl, &rewrite.sender, ctx.authenticated_as)?
        }
    };

    if authorized {
        // The header rewrite invalidates any signature computed over the
        // old header set.
        msg.remove_all("DKIM-Signature");
        msg.replace(
            "Subject",
            &codec.encode(&residual, decoded.encoding.as_ref()),
        );
        msg.replace("From", &rewrite.from_value);
        if msg.get("Return-Path").is_some() {
            msg.replace("Return-Path", &rewrite.sender);
        }

        info!(
            sender = %rewrite.sender,
            recipients = %ctx.recipients.join(", "),
            "Sender rewrite applied, resubmitting message"
        );
        transport.submit(&rewrite.sender, ctx.recipients, &msg.to_bytes())
    } else {
        warn!(
            derived = %rewrite.sender,
            authenticated_as = %ctx.authenticated_as,
            "Unauthorized sender rewrite, bouncing to authenticated identity"
        );

        let bounce = build_bounce(
            &msg,
            &BounceParams {
                postmaster: ctx.postmaster,
                original_from: &from_value,
                derived_from: &rewrite.from_value,
                authenticated_as: ctx.authenticated_as,
                original_subject: &decoded.text,
            },
        );

        // The bounce goes to whoever attempted the rewrite, not to the
        // nominal message sender.
        let bounce_rcpt = vec![ctx.authenticated_as.to_string()];
        transport.submit(ctx.postmaster, &bounce_rcpt, &bounce.to_bytes())
    }
}
