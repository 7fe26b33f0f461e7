use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hickory_resolver::TokioAsyncResolver;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::command;
use super::session::Session;
use super::{Envelope, MailSender};
use crate::logger::Logger;

/// Cap on the PTR lookup a session performs before sending its banner.
const PTR_TIMEOUT: Duration = Duration::from_secs(3);

/// SMTP listener configuration. Immutable once constructed; one session is
/// spawned per accepted connection, with no admission control.
pub struct Server {
    addr: String,
    appname: String,
    hostname: String,
    mail_tx: MailSender,
    logger: Arc<Logger>,
    resolver: Option<TokioAsyncResolver>,
}

impl Server {
    pub fn new(
        addr: &str,
        mail_tx: MailSender,
        appname: &str,
        hostname: &str,
        logger: Arc<Logger>,
    ) -> Self {
        let addr = if addr.is_empty() { "0.0.0.0:25" } else { addr }.to_string();
        let appname = if appname.is_empty() { "smtpd" } else { appname }.to_string();
        let hostname = if hostname.is_empty() {
            local_hostname()
        } else {
            hostname.to_string()
        };

        Self {
            addr,
            appname,
            hostname,
            mail_tx,
            logger,
            // best effort; sessions fall back to "unknown" without it
            resolver: TokioAsyncResolver::tokio_from_system_conf().ok(),
        }
    }

    /// Bind the configured address and serve until an unrecoverable
    /// listener error.
    pub async fn listen_and_serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        self.serve(listener).await
    }

    /// Accept loop over an existing listener. Transient accept errors are
    /// retried; anything else ends the server and surfaces to the caller.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_client(stream, remote_addr).await {
                            // transport failures end a session like an
                            // ordinary disconnect
                            server
                                .logger
                                .debug(format!("session {remote_addr} ended: {err}"))
                                .await;
                        }
                    });
                }
                Err(err) if is_transient(&err) => {
                    self.logger
                        .debug(format!("transient accept error: {err}"))
                        .await;
                }
                Err(err) => return Err(err).context("accept failed"),
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, remote_addr: SocketAddr) -> Result<()> {
        let remote_ip = remote_addr.ip().to_string();
        let remote_host = self.reverse_host(remote_addr.ip()).await;
        let mut session = Session::new(remote_ip, remote_host);

        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        self.logger
            .debug(format!("incoming connection from {}", session.remote_ip))
            .await;
        let banner = format!("220 {} {} SMTP Service ready", self.hostname, self.appname);
        self.reply(&mut writer, &session.remote_ip, &banner).await?;

        let mut line = String::new();
        loop {
            line.clear();
            // a read failure is an ordinary disconnect, never a protocol
            // error
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let trimmed = line.trim();
            self.logger
                .debug(format!("{} >> {}", session.remote_ip, trimmed))
                .await;
            let (verb, args) = command::parse_line(trimmed);

            match verb.as_str() {
                "EHLO" | "HELO" => {
                    session.remote_name = args.to_string();
                    // RFC 5321 section 4.1.4: EHLO has the same effect as
                    // RSET on the transaction
                    session.reset();
                    let greeting = format!("250 {} greets {}", self.hostname, session.remote_name);
                    self.reply(&mut writer, &session.remote_ip, &greeting).await?;
                }
                "MAIL" => match command::mail_from(args) {
                    Some(sender) => {
                        session.begin(sender);
                        self.reply(&mut writer, &session.remote_ip, "250 Ok").await?;
                    }
                    None => {
                        self.refuse(
                            &mut writer,
                            &session.remote_ip,
                            "501 Syntax error in parameters or arguments (invalid FROM parameter)",
                        )
                        .await?;
                    }
                },
                "RCPT" => {
                    if session.from.is_none() {
                        self.refuse(
                            &mut writer,
                            &session.remote_ip,
                            "503 Bad sequence of commands (MAIL required before RCPT)",
                        )
                        .await?;
                        continue;
                    }
                    match command::rcpt_to(args) {
                        Some(recipient) => {
                            if session.push_recipient(recipient) {
                                self.reply(&mut writer, &session.remote_ip, "250 Ok").await?;
                            } else {
                                self.refuse(&mut writer, &session.remote_ip, "452 Too many recipients")
                                    .await?;
                            }
                        }
                        None => {
                            self.refuse(
                                &mut writer,
                                &session.remote_ip,
                                "501 Syntax error in parameters or arguments (invalid TO parameter)",
                            )
                            .await?;
                        }
                    }
                }
                "DATA" => {
                    if session.from.is_none() || session.to.is_empty() {
                        self.refuse(
                            &mut writer,
                            &session.remote_ip,
                            "503 Bad sequence of commands (MAIL & RCPT required before DATA)",
                        )
                        .await?;
                        continue;
                    }

                    self.reply(
                        &mut writer,
                        &session.remote_ip,
                        "354 Start mail input; end with <CR><LF>.<CR><LF>",
                    )
                    .await?;

                    session.data.clear();
                    if read_data(&mut reader, &mut session.data).await.is_err() {
                        // mid-body failure kills the whole session, not
                        // just the transaction
                        break;
                    }

                    let mut message = session
                        .received_header(&self.hostname, &self.appname)
                        .into_bytes();
                    message.extend_from_slice(&session.data);

                    self.reply(&mut writer, &session.remote_ip, "250 Ok: queued").await?;

                    let envelope = Envelope {
                        remote_addr,
                        from: session.from.clone().unwrap_or_default(),
                        to: session.to.clone(),
                        data: message,
                    };
                    // delivery is the consumer's problem; nothing to do
                    // here if it is gone
                    let _ = self.mail_tx.send(envelope);

                    session.reset();
                }
                "QUIT" => {
                    let goodbye = format!(
                        "221 {} {} SMTP Service closing transmission channel",
                        self.hostname, self.appname
                    );
                    self.reply(&mut writer, &session.remote_ip, &goodbye).await?;
                    break;
                }
                "RSET" => {
                    session.reset();
                    self.reply(&mut writer, &session.remote_ip, "250 Ok").await?;
                }
                "NOOP" => {
                    self.reply(&mut writer, &session.remote_ip, "250 Ok").await?;
                }
                // RFC 5321 section 4.2.4 on the 500/502 distinction
                "HELP" | "VRFY" | "EXPN" => {
                    self.reply(&mut writer, &session.remote_ip, "502 Command not implemented")
                        .await?;
                }
                _ => {
                    self.reply(&mut writer, &session.remote_ip, "500 Syntax error, command unrecognized")
                        .await?;
                }
            }
        }

        self.logger
            .debug(format!("connection from {} closed", session.remote_ip))
            .await;
        Ok(())
    }

    /// Write a single CRLF-terminated reply line, flushed before the next
    /// read so it is observable immediately.
    async fn reply<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        remote_ip: &str,
        line: &str,
    ) -> Result<()> {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
        self.logger.debug(format!("{remote_ip} << {line}")).await;
        Ok(())
    }

    /// Reply to a protocol violation. The session stays usable.
    async fn refuse<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        remote_ip: &str,
        line: &str,
    ) -> Result<()> {
        self.logger.error(format!("{remote_ip}: {line}")).await;
        self.reply(writer, remote_ip, line).await
    }

    async fn reverse_host(&self, ip: IpAddr) -> String {
        if ip.is_loopback() {
            // what the hosts file would say, without a PTR round trip
            return "localhost".to_string();
        }
        if let Some(resolver) = &self.resolver {
            let lookup = tokio::time::timeout(PTR_TIMEOUT, resolver.reverse_lookup(ip)).await;
            if let Ok(Ok(ptr)) = lookup {
                if let Some(name) = ptr.iter().next() {
                    return name.to_string().trim_end_matches('.').to_string();
                }
            }
        }
        "unknown".to_string()
    }
}

/// Read the message body following DATA, line by line, until the bare-dot
/// terminator. The terminator is not part of the body; a single leading
/// dot is stripped from every other line (RFC 5321 section 4.5.2). Line
/// terminators are kept as received.
async fn read_data<R: AsyncBufRead + Unpin>(reader: &mut R, body: &mut Vec<u8>) -> io::Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 || !line.ends_with(b"\n") {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if line.as_slice() == b".\r\n" {
            return Ok(());
        }
        let unstuffed = if line.starts_with(b".") { &line[1..] } else { &line[..] };
        body.extend_from_slice(unstuffed);
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8]) -> io::Result<Vec<u8>> {
        let mut reader = BufReader::new(input);
        let mut body = Vec::new();
        read_data(&mut reader, &mut body).await.map(|_| body)
    }

    #[tokio::test]
    async fn body_ends_at_bare_dot() {
        let body = collect(b"Subject: hi\r\n\r\nhello\r\n.\r\nMAIL FROM:<x>\r\n")
            .await
            .unwrap();
        assert_eq!(body, b"Subject: hi\r\n\r\nhello\r\n");
    }

    #[tokio::test]
    async fn leading_dots_are_unstuffed() {
        let body = collect(b"..text\r\n...x\r\n.\r\n").await.unwrap();
        assert_eq!(body, b".text\r\n..x\r\n");
    }

    #[tokio::test]
    async fn terminators_are_preserved() {
        let body = collect(b"unix\nline\r\n.\r\n").await.unwrap();
        assert_eq!(body, b"unix\nline\r\n");
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        assert!(collect(b"partial").await.is_err());
        assert!(collect(b"line\r\n").await.is_err());
        assert!(collect(b"").await.is_err());
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(is_transient(&io::ErrorKind::ConnectionReset.into()));
        assert!(is_transient(&io::ErrorKind::WouldBlock.into()));
        assert!(!is_transient(&io::ErrorKind::AddrInUse.into()));
        assert!(!is_transient(&io::ErrorKind::PermissionDenied.into()));
    }
}
