//! Mailbox address grammar (RFC 5321 §4.1.2), as used by [`crate::smtp::parser`].

use crate::error::{Result, SmtpError};

/// Validate a reverse-path/forward-path mailbox. The empty string is valid
/// (the null sender, `MAIL FROM:<>`) and is validated by the caller instead.
///
/// Accepts `local@domain` and domain literals (`local@[192.0.2.1]`,
/// `local@[IPv6:2001:db8::1]`). When `smtputf8` is false, both the local
/// part and domain are restricted to ASCII; when true, UTF-8 is allowed in
/// either per RFC 6531.
pub fn validate_mailbox(address: &str, smtputf8: bool) -> Result<()> {
    if address.is_empty() {
        return Ok(());
    }

    if !smtputf8 && !address.is_ascii() {
        return Err(SmtpError::Malformed(
            "non-ASCII address without SMTPUTF8".to_string(),
        ));
    }

    let (local, domain) = address
        .rsplit_once('@')
        .ok_or_else(|| SmtpError::Malformed("address missing '@'".to_string()))?;

    if local.is_empty() {
        return Err(SmtpError::Malformed("empty local part".to_string()));
    }

    if domain.is_empty() {
        return Err(SmtpError::Malformed("empty domain".to_string()));
    }

    if domain.starts_with('[') {
        validate_domain_literal(domain)
    } else if !domain.contains('.') {
        Err(SmtpError::Malformed("domain must contain a dot".to_string()))
    } else {
        Ok(())
    }
}

fn validate_domain_literal(domain: &str) -> Result<()> {
    if !domain.ends_with(']') {
        return Err(SmtpError::Malformed("unterminated domain literal".to_string()));
    }
    let inner = &domain[1..domain.len() - 1];

    if let Some(rest) = inner.strip_prefix("IPv6:") {
        rest.parse::<std::net::Ipv6Addr>()
            .map(|_| ())
            .map_err(|_| SmtpError::Malformed("invalid IPv6 domain literal".to_string()))
    } else {
        inner
            .parse::<std::net::Ipv4Addr>()
            .map(|_| ())
            .map_err(|_| SmtpError::Malformed("invalid IPv4 domain literal".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(validate_mailbox("user@example.com", false).is_ok());
        assert!(validate_mailbox("user.name@example.co.uk", false).is_ok());
    }

    #[test]
    fn accepts_null_sender() {
        assert!(validate_mailbox("", false).is_ok());
    }

    #[test]
    fn accepts_domain_literals() {
        assert!(validate_mailbox("user@[192.0.2.1]", false).is_ok());
        assert!(validate_mailbox("user@[IPv6:2001:db8::1]", false).is_ok());
    }

    #[test]
    fn rejects_malformed_domain_literal() {
        assert!(validate_mailbox("user@[not-an-ip]", false).is_err());
    }

    #[test]
    fn rejects_missing_at() {
        assert!(validate_mailbox("notanaddress", false).is_err());
    }

    #[test]
    fn rejects_domain_without_dot() {
        assert!(validate_mailbox("user@localhost", false).is_err());
    }

    #[test]
    fn rejects_non_ascii_without_smtputf8() {
        assert!(validate_mailbox("üser@example.com", false).is_err());
        assert!(validate_mailbox("üser@example.com", true).is_ok());
    }
}
