use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

mod acl;
mod bounce;
mod error;
mod filter;
mod message;
mod rewrite;
mod sendmail;
mod subject;

use acl::PostmapAcl;
use error::EX_TEMPFAIL;
use filter::{run_filter, FilterContext};
use message::MailMessage;
use sendmail::SendmailTransport;

#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
#[command(about = "Read a mail message from stdin, rewrite Header-From based on subject tags and resubmit it for delivery")]
struct Args {
    /// Declared envelope sender
    #[arg(short = 'f', long = "from")]
    sender: String,

    /// Authenticated identity supplied by the MTA
    #[arg(short = 'a', long = "auth-user")]
    authenticated_as: String,

    /// Sendmail binary used to resubmit messages
    #[arg(long, env = "SENDMAIL_BIN", default_value = "/usr/sbin/sendmail")]
    sendmail_bin: PathBuf,

    /// Alternate sendmail configuration directory (passed as -C)
    #[arg(long, env = "SENDMAIL_CONFIG_DIR")]
    sendmail_config_dir: Option<PathBuf>,

    /// postmap binary used for sender ACL lookups
    #[arg(long, env = "POSTMAP_BIN", default_value = "/usr/sbin/postmap")]
    postmap_bin: PathBuf,

    /// Sender ACL map queried for subdomain rewrites
    #[arg(
        long,
        env = "SENDER_ACL_MAP",
        default_value = "mysql:/opt/postfix/conf/sql/mysql_virtual_sender_acl.cf"
    )]
    sender_acl_map: String,

    /// From/envelope sender used on policy bounces
    #[arg(long, env = "POSTMASTER_ADDR", default_value = "postmaster@localhost")]
    postmaster: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Declared recipients
    #[arg(required = true)]
    recipients: Vec<String>,
}

fn setup_logging(level: &str) {
    let filter = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("Failed to read message from stdin")?;
    Ok(raw)
}

fn main() {
    let args = Args::parse();

    setup_logging(&args.log_level);

    info!(
        sender = %args.sender,
        authenticated_as = %args.authenticated_as,
        recipients = %args.recipients.join(", "),
        "Starting content filter"
    );

    let raw = match read_stdin() {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "Could not load message");
            process::exit(EX_TEMPFAIL);
        }
    };

    let msg = match MailMessage::parse(&raw) {
        Ok(msg) => msg,
        Err(e) => {
            error!(error = %e, "Could not parse message");
            process::exit(e.exit_code());
        }
    };

    let acl = PostmapAcl::new(args.postmap_bin.clone(), args.sender_acl_map.clone());
    let transport = SendmailTransport::new(
        args.sendmail_bin.clone(),
        args.sendmail_config_dir.clone(),
    );
    let ctx = FilterContext {
        authenticated_as: &args.authenticated_as,
        recipients: &args.recipients,
        postmaster: &args.postmaster,
    };

    match run_filter(msg, &ctx, &acl, &transport) {
        Ok(submission) => {
            info!(
                status = submission.status,
                "Finished mail processing, handing over to the MTA"
            );
            if !submission.output.is_empty() {
                print!("{}", submission.output);
            }
            process::exit(submission.status);
        }
        Err(e) => {
            error!(error = %e, "Mail processing failed");
            process::exit(e.exit_code());
        }
    }
}
