use chrono::Local;

/// RFC 5321 requires servers to accept at least 100 recipients; this one
/// accepts at most that.
pub const MAX_RECIPIENTS: usize = 100;

/// Per-connection transaction state.
///
/// `from`/`to`/`data` live from one reset to the next; a connection may
/// carry any number of sequential transactions. `None` for the sender
/// means no transaction is open — the null reverse-path (`MAIL FROM:<>`)
/// is `Some("")` and keeps the transaction valid.
pub struct Session {
    pub remote_ip: String,
    /// Reverse DNS of the peer, best effort.
    pub remote_host: String,
    /// Name the peer supplied with EHLO/HELO.
    pub remote_name: String,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub data: Vec<u8>,
}

impl Session {
    pub fn new(remote_ip: String, remote_host: String) -> Self {
        Self {
            remote_ip,
            remote_host,
            remote_name: String::new(),
            from: None,
            to: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Open a transaction for `sender`, discarding any recipients and data
    /// accumulated so far.
    pub fn begin(&mut self, sender: String) {
        self.from = Some(sender);
        self.to.clear();
        self.data.clear();
    }

    /// Append a recipient unless the transaction already carries
    /// [`MAX_RECIPIENTS`]. Returns whether the recipient was stored.
    pub fn push_recipient(&mut self, recipient: String) -> bool {
        if self.to.len() >= MAX_RECIPIENTS {
            return false;
        }
        self.to.push(recipient);
        true
    }

    /// Drop the transaction. EHLO, HELO, RSET and a completed DATA all end
    /// up here; the peer identity survives.
    pub fn reset(&mut self) {
        self.from = None;
        self.to.clear();
        self.data.clear();
    }

    /// Synthesize the `Received:` trace header for the current message.
    ///
    /// Records only the first recipient, like the trace headers this
    /// replaces; continuation lines are indented with eight spaces.
    pub fn received_header(&self, hostname: &str, appname: &str) -> String {
        let now = Local::now().format("%a, %e %b %Y %H:%M:%S %z (%Z)");
        let first = self.to.first().map(String::as_str).unwrap_or_default();
        format!(
            "Received: from {} ({} [{}])\r\n        by {} ({}) with SMTP\r\n        for <{}>; {}\r\n",
            self.remote_name, self.remote_host, self.remote_ip, hostname, appname, first, now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("127.0.0.1".into(), "localhost".into())
    }

    #[test]
    fn begin_discards_previous_transaction() {
        let mut s = session();
        s.begin("a@b.com".into());
        assert!(s.push_recipient("c@d.com".into()));
        s.data.extend_from_slice(b"stale");

        s.begin("e@f.com".into());
        assert_eq!(s.from.as_deref(), Some("e@f.com"));
        assert!(s.to.is_empty());
        assert!(s.data.is_empty());
    }

    #[test]
    fn null_sender_keeps_transaction_open() {
        let mut s = session();
        s.begin(String::new());
        assert_eq!(s.from.as_deref(), Some(""));
    }

    #[test]
    fn recipient_cap_is_enforced() {
        let mut s = session();
        s.begin("a@b.com".into());
        for i in 0..MAX_RECIPIENTS {
            assert!(s.push_recipient(format!("user{i}@example.org")));
        }
        assert!(!s.push_recipient("extra@example.org".into()));
        assert_eq!(s.to.len(), MAX_RECIPIENTS);
    }

    #[test]
    fn reset_clears_everything_and_is_idempotent() {
        let mut s = session();
        s.remote_name = "client.local".into();
        s.begin("a@b.com".into());
        s.push_recipient("c@d.com".into());
        s.data.extend_from_slice(b"body");

        s.reset();
        assert!(s.from.is_none());
        assert!(s.to.is_empty());
        assert!(s.data.is_empty());
        // the greeting name is not transaction state
        assert_eq!(s.remote_name, "client.local");

        s.reset();
        assert!(s.from.is_none());
        assert!(s.to.is_empty());
        assert!(s.data.is_empty());
    }

    #[test]
    fn received_header_uses_first_recipient_only() {
        let mut s = session();
        s.remote_name = "client.local".into();
        s.begin("a@b.com".into());
        s.push_recipient("one@example.org".into());
        s.push_recipient("two@example.org".into());

        let header = s.received_header("mail.example.org", "smtp2tg");
        assert!(header.starts_with("Received: from client.local (localhost [127.0.0.1])\r\n"));
        assert!(header.contains("        by mail.example.org (smtp2tg) with SMTP\r\n"));
        assert!(header.contains("        for <one@example.org>; "));
        assert!(!header.contains("two@example.org"));
        assert!(header.ends_with("\r\n"));
    }
}
