use std::sync::LazyLock;

use regex::Regex;

// The FROM pattern allows an empty capture: delivery status notifications
// are sent with the null reverse-path `MAIL FROM:<>`. The TO pattern
// requires at least one character. Keep the asymmetry.
static MAIL_FROM: LazyLock<Regex> = LazyLock::new(|| Regex::new("(?i)FROM:(.*)").unwrap());
static RCPT_TO: LazyLock<Regex> = LazyLock::new(|| Regex::new("(?i)TO:(.+)").unwrap());

/// Split a command line into an uppercased verb and its argument string.
///
/// Everything before the first space is the verb; the remainder, trimmed,
/// is the argument. A line with no space is a bare verb.
pub fn parse_line(line: &str) -> (String, &str) {
    match line.find(' ') {
        Some(idx) => (line[..idx].to_uppercase(), line[idx + 1..].trim()),
        None => (line.to_uppercase(), ""),
    }
}

/// Extract the reverse-path from a MAIL argument string.
///
/// Returns `None` on a syntax error. The captured address may be empty
/// (null sender).
pub fn mail_from(args: &str) -> Option<String> {
    MAIL_FROM
        .captures(args)
        .map(|caps| strip_angles(&caps[1]).to_string())
}

/// Extract the forward-path from an RCPT argument string.
pub fn rcpt_to(args: &str) -> Option<String> {
    RCPT_TO
        .captures(args)
        .map(|caps| strip_angles(&caps[1]).to_string())
}

/// Trim surrounding whitespace and one pair of enclosing angle brackets,
/// so `<user@example.org>` and `user@example.org` store the same.
fn strip_angles(addr: &str) -> &str {
    let addr = addr.trim();
    addr.strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_verb_and_args() {
        assert_eq!(parse_line("MAIL FROM:<a@b.com>"), ("MAIL".into(), "FROM:<a@b.com>"));
        assert_eq!(parse_line("helo client.local"), ("HELO".into(), "client.local"));
        assert_eq!(parse_line("QUIT"), ("QUIT".into(), ""));
        assert_eq!(parse_line(""), (String::new(), ""));
        assert_eq!(parse_line("NOOP   "), ("NOOP".into(), ""));
    }

    #[test]
    fn mail_from_matches_case_insensitively() {
        assert_eq!(mail_from("from:<a@b.com>"), Some("a@b.com".into()));
        assert_eq!(mail_from("FROM:<a@b.com>"), Some("a@b.com".into()));
        assert_eq!(mail_from("From: <a@b.com>"), Some("a@b.com".into()));
    }

    #[test]
    fn mail_from_allows_null_sender() {
        assert_eq!(mail_from("FROM:<>"), Some(String::new()));
        assert_eq!(mail_from("FROM:"), Some(String::new()));
    }

    #[test]
    fn mail_from_rejects_garbage() {
        assert_eq!(mail_from("bogus"), None);
        assert_eq!(mail_from(""), None);
    }

    #[test]
    fn rcpt_to_requires_an_address() {
        assert_eq!(rcpt_to("TO:<c@d.com>"), Some("c@d.com".into()));
        assert_eq!(rcpt_to("to:<c@d.com>"), Some("c@d.com".into()));
        assert_eq!(rcpt_to("TO:"), None);
        assert_eq!(rcpt_to("bogus"), None);
    }

    #[test]
    fn strips_one_pair_of_angles() {
        assert_eq!(strip_angles("<a@b.com>"), "a@b.com");
        assert_eq!(strip_angles("a@b.com"), "a@b.com");
        assert_eq!(strip_angles(" <a@b.com> "), "a@b.com");
        assert_eq!(strip_angles("<>"), "");
        // unbalanced brackets are left alone
        assert_eq!(strip_angles("<a@b.com"), "<a@b.com");
    }
}
