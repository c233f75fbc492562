//! The mail transaction data model (RFC 5321 envelope), distinct from the
//! RFC 5322 headers that may appear inside the body once it is received.

/// `BODY=` parameter recorded on `MAIL FROM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyType {
    #[default]
    SevenBit,
    EightBitMime,
    BinaryMime,
}

/// `RET=` parameter (delivery status notification scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsnRet {
    Full,
    Hdrs,
}

/// `NOTIFY=` parameter on `RCPT TO`, a set of trigger conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsnNotify {
    Never,
    Success,
    Failure,
    Delay,
}

/// `BY=<time>;<mode>` DELIVERBY parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverByMode {
    Return,
    NotifyOnly,
    TraceOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverBy {
    pub seconds: i64,
    pub mode: DeliverByMode,
}

/// One forward-path (`RCPT TO`) with its own optional DSN parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub notify: Option<Vec<DsnNotify>>,
    pub orcpt: Option<String>,
}

impl Recipient {
    pub fn new(address: String) -> Self {
        Self {
            address,
            notify: None,
            orcpt: None,
        }
    }
}

/// The envelope of a single in-progress mail transaction.
///
/// Created on `MAIL FROM`, cleared by `RSET`, `QUIT`, or a completed
/// delivery. `reverse_path` is `Some("")` for the null sender (`MAIL
/// FROM:<>`, used for bounces) and `None` before any `MAIL FROM` has been
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub reverse_path: Option<String>,
    pub forward_paths: Vec<Recipient>,
    pub declared_size: Option<usize>,
    pub body_type: BodyType,
    pub smtputf8: bool,
    pub dsn_envid: Option<String>,
    pub dsn_ret: Option<DsnRet>,
    pub deliver_by: Option<DeliverBy>,
}

impl Envelope {
    pub fn new(reverse_path: String) -> Self {
        Self {
            reverse_path: Some(reverse_path),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reverse_path.is_none()
    }
}
