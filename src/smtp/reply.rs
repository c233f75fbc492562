//! SMTP reply formatting (C3), RFC 5321 §4.2 / RFC 3463 enhanced codes.

use crate::error::SmtpError;

/// A single reply line: `{code} {enhanced}? {text}\r\n`.
pub fn single(code: u16, enhanced: Option<&str>, text: &str) -> String {
    match enhanced {
        Some(e) => format!("{code} {e} {text}\r\n"),
        None => format!("{code} {text}\r\n"),
    }
}

/// A multi-line reply (e.g. EHLO capabilities): all but the last line use
/// `-` after the code, the last uses a space.
pub fn multi(code: u16, lines: &[&str]) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let sep = if i + 1 == lines.len() { ' ' } else { '-' };
        out.push_str(&format!("{code}{sep}{line}\r\n"));
    }
    out
}

/// Render an [`SmtpError`] as the reply the client should receive.
pub fn from_error(err: &SmtpError) -> String {
    let wire = err.wire_reply();
    single(wire.code, Some(wire.enhanced), wire.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_single_line_with_enhanced_code() {
        assert_eq!(single(250, Some("2.1.0"), "OK"), "250 2.1.0 OK\r\n");
    }

    #[test]
    fn formats_single_line_without_enhanced_code() {
        assert_eq!(single(354, None, "Start mail input"), "354 Start mail input\r\n");
    }

    #[test]
    fn formats_multi_line_reply() {
        let out = multi(250, &["mail.example.com", "SIZE 1024", "PIPELINING"]);
        assert_eq!(
            out,
            "250-mail.example.com\r\n250-SIZE 1024\r\n250 PIPELINING\r\n"
        );
    }

    #[test]
    fn maps_error_to_wire_reply() {
        let text = from_error(&SmtpError::BadSequence);
        assert_eq!(text, "503 5.5.1 Bad sequence of commands\r\n");
    }
}
