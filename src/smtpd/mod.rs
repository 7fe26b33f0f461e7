//! Minimal SMTP server.
//!
//! Accepts TCP connections and drives each through the SMTP command
//! sequence (EHLO/HELO, MAIL, RCPT, DATA, RSET, NOOP, QUIT), collecting an
//! envelope and a dot-unstuffed body. Each completed message is prefixed
//! with a synthesized `Received:` header and sent as an [`Envelope`] on the
//! channel given at construction; the session never waits for delivery and
//! replies `250 Ok: queued` regardless of what the consumer does with it.
//!
//! No extensions are implemented: no STARTTLS, no AUTH, no capability list
//! beyond the static greeting.

pub mod command;
pub mod server;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::logger::Logger;

pub use server::Server;
pub use session::{Session, MAX_RECIPIENTS};

/// A fully assembled inbound message.
///
/// `data` is the synthesized trace header followed by the unescaped body,
/// line terminators intact. `from` and `to` are trimmed of whitespace and
/// angle brackets; `from` is empty for the null reverse-path.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub remote_addr: SocketAddr,
    pub from: String,
    pub to: Vec<String>,
    pub data: Vec<u8>,
}

/// Sending half of the delivery handoff. Sessions push envelopes here and
/// move on; the receiving end decides how and when to deliver.
pub type MailSender = mpsc::UnboundedSender<Envelope>;

/// Listen on `addr` and serve SMTP until an unrecoverable listener error.
///
/// Empty `addr`, `appname` and `hostname` fall back to `0.0.0.0:25`,
/// `smtpd` and the local host name.
pub async fn listen_and_serve(
    addr: &str,
    mail_tx: MailSender,
    appname: &str,
    hostname: &str,
    logger: Arc<Logger>,
) -> Result<()> {
    Arc::new(Server::new(addr, mail_tx, appname, hostname, logger))
        .listen_and_serve()
        .await
}
