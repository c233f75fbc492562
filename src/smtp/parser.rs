//! ESMTP command parsing (C2), RFC 5321 §4.1.

use crate::error::{Result, SmtpError};
use crate::smtp::envelope::{BodyType, DeliverBy, DeliverByMode, DsnNotify, DsnRet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailParams {
    pub size: Option<usize>,
    pub body: Option<BodyType>,
    pub smtputf8: bool,
    pub envid: Option<String>,
    pub ret: Option<DsnRet>,
    pub deliver_by: Option<DeliverBy>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RcptParams {
    pub notify: Option<Vec<DsnNotify>>,
    pub orcpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    MailFrom { reverse_path: String, params: MailParams },
    RcptTo { forward_path: String, params: RcptParams },
    Data,
    Bdat { size: usize, last: bool },
    Rset,
    Noop,
    Quit,
    Starttls,
    Auth { mechanism: String, initial_response: Option<String> },
    Vrfy,
    Expn,
}

impl Command {
    /// Whether this command may be grouped with others in a single
    /// pipelined reply batch (RFC 5321 §4.1.1 / PIPELINING extension).
    pub fn is_pipelinable(&self) -> bool {
        matches!(
            self,
            Command::Helo(_)
                | Command::Ehlo(_)
                | Command::MailFrom { .. }
                | Command::RcptTo { .. }
                | Command::Rset
                | Command::Noop
                | Command::Vrfy
                | Command::Expn
        )
    }

    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(SmtpError::Malformed("empty command line".to_string()));
        }

        let (verb, args) = match line.find(' ') {
            Some(idx) => (&line[..idx], line[idx + 1..].trim_start()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(SmtpError::Malformed("HELO requires a domain".to_string()));
                }
                Ok(Command::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(SmtpError::Malformed("EHLO requires a domain".to_string()));
                }
                Ok(Command::Ehlo(args.to_string()))
            }
            "MAIL" => Self::parse_mail(args),
            "RCPT" => Self::parse_rcpt(args),
            "DATA" => Ok(Command::Data),
            "BDAT" => Self::parse_bdat(args),
            "RSET" => Ok(Command::Rset),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            "STARTTLS" => Ok(Command::Starttls),
            "VRFY" => Ok(Command::Vrfy),
            "EXPN" => Ok(Command::Expn),
            "AUTH" => {
                if args.is_empty() {
                    return Err(SmtpError::Malformed("AUTH requires a mechanism".to_string()));
                }
                let (mechanism, rest) = match args.find(' ') {
                    Some(idx) => (&args[..idx], Some(args[idx + 1..].trim().to_string())),
                    None => (args, None),
                };
                Ok(Command::Auth {
                    mechanism: mechanism.to_string(),
                    initial_response: rest,
                })
            }
            other => Err(SmtpError::UnknownVerb(other.to_string())),
        }
    }

    fn parse_mail(args: &str) -> Result<Self> {
        let rest = strip_prefix_ci(args, "FROM:")
            .ok_or_else(|| SmtpError::Malformed("MAIL requires FROM:".to_string()))?;
        let (reverse_path, param_str) = take_path(rest)?;

        let mut params = MailParams::default();
        for (key, value) in split_params(param_str)? {
            match key.to_ascii_uppercase().as_str() {
                "SIZE" => {
                    let n: usize = value
                        .as_deref()
                        .ok_or_else(|| SmtpError::Malformed("SIZE requires a value".to_string()))?
                        .parse()
                        .map_err(|_| SmtpError::Malformed("SIZE must be numeric".to_string()))?;
                    params.size = Some(n);
                }
                "BODY" => {
                    params.body = Some(match value.as_deref().map(str::to_ascii_uppercase) {
                        Some(ref s) if s == "7BIT" => BodyType::SevenBit,
                        Some(ref s) if s == "8BITMIME" => BodyType::EightBitMime,
                        Some(ref s) if s == "BINARYMIME" => BodyType::BinaryMime,
                        _ => return Err(SmtpError::Malformed("invalid BODY value".to_string())),
                    });
                }
                "SMTPUTF8" => params.smtputf8 = true,
                "AUTH" => {} // accepted and ignored per trusted-submitter policy
                "ENVID" => {
                    params.envid =
                        Some(value.ok_or_else(|| SmtpError::Malformed("ENVID requires a value".to_string()))?);
                }
                "RET" => {
                    params.ret = Some(match value.as_deref().map(str::to_ascii_uppercase) {
                        Some(ref s) if s == "FULL" => DsnRet::Full,
                        Some(ref s) if s == "HDRS" => DsnRet::Hdrs,
                        _ => return Err(SmtpError::Malformed("invalid RET value".to_string())),
                    });
                }
                "BY" => {
                    params.deliver_by = Some(parse_deliver_by(
                        value.as_deref().ok_or_else(|| SmtpError::Malformed("BY requires a value".to_string()))?,
                    )?);
                }
                other => return Err(SmtpError::UnknownParam(other.to_string())),
            }
        }

        Ok(Command::MailFrom {
            reverse_path,
            params,
        })
    }

    fn parse_rcpt(args: &str) -> Result<Self> {
        let rest = strip_prefix_ci(args, "TO:")
            .ok_or_else(|| SmtpError::Malformed("RCPT requires TO:".to_string()))?;
        let (forward_path, param_str) = take_path(rest)?;
        if forward_path.is_empty() {
            return Err(SmtpError::Malformed("RCPT TO cannot be the null address".to_string()));
        }

        let mut params = RcptParams::default();
        for (key, value) in split_params(param_str)? {
            match key.to_ascii_uppercase().as_str() {
                "NOTIFY" => {
                    let value = value.ok_or_else(|| SmtpError::Malformed("NOTIFY requires a value".to_string()))?;
                    let mut notify = Vec::new();
                    for part in value.split(',') {
                        notify.push(match part.to_ascii_uppercase().as_str() {
                            "NEVER" => DsnNotify::Never,
                            "SUCCESS" => DsnNotify::Success,
                            "FAILURE" => DsnNotify::Failure,
                            "DELAY" => DsnNotify::Delay,
                            _ => return Err(SmtpError::Malformed("invalid NOTIFY value".to_string())),
                        });
                    }
                    params.notify = Some(notify);
                }
                "ORCPT" => {
                    params.orcpt =
                        Some(value.ok_or_else(|| SmtpError::Malformed("ORCPT requires a value".to_string()))?);
                }
                other => return Err(SmtpError::UnknownParam(other.to_string())),
            }
        }

        Ok(Command::RcptTo {
            forward_path,
            params,
        })
    }

    fn parse_bdat(args: &str) -> Result<Self> {
        let mut parts = args.split_whitespace();
        let size: usize = parts
            .next()
            .ok_or_else(|| SmtpError::Malformed("BDAT requires a chunk size".to_string()))?
            .parse()
            .map_err(|_| SmtpError::Malformed("BDAT size must be numeric".to_string()))?;
        let last = match parts.next() {
            None => false,
            Some(s) if s.eq_ignore_ascii_case("LAST") => true,
            Some(_) => return Err(SmtpError::Malformed("invalid BDAT argument".to_string())),
        };
        Ok(Command::Bdat { size, last })
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Split a `<path> [param param ...]` segment: the path is required to be
/// angle-bracketed (`<>` for the null sender is legal).
fn take_path(s: &str) -> Result<(String, &str)> {
    let s = s.trim_start();
    if !s.starts_with('<') {
        return Err(SmtpError::Malformed("path must be enclosed in <>".to_string()));
    }
    let end = s
        .find('>')
        .ok_or_else(|| SmtpError::Malformed("unterminated path".to_string()))?;
    let path = s[1..end].to_string();
    Ok((path, s[end + 1..].trim_start()))
}

fn split_params(s: &str) -> Result<Vec<(String, Option<String>)>> {
    let mut out = Vec::new();
    for token in s.split_whitespace() {
        match token.split_once('=') {
            Some((k, v)) => out.push((k.to_string(), Some(v.to_string()))),
            None => out.push((token.to_string(), None)),
        }
    }
    Ok(out)
}

fn parse_deliver_by(value: &str) -> Result<DeliverBy> {
    let (secs, mode) = value
        .split_once(';')
        .ok_or_else(|| SmtpError::Malformed("BY requires <seconds>;<mode>".to_string()))?;
    let seconds: i64 = secs
        .parse()
        .map_err(|_| SmtpError::Malformed("BY seconds must be numeric".to_string()))?;
    let mode = match mode {
        "R" => DeliverByMode::Return,
        "N" => DeliverByMode::NotifyOnly,
        "T" => DeliverByMode::TraceOnly,
        _ => return Err(SmtpError::Malformed("invalid BY mode".to_string())),
    };
    Ok(DeliverBy { seconds, mode })
}
