//! Operation results and the error taxonomy.
//!
//! Most LDAP operations eventually produce an [`LdapResult`](struct.LdapResult.html).
//! This module contains its definition, the crate-wide error enum, and the
//! status mapper which classifies raw protocol result codes into coarse
//! error kinds. Numeric result codes are wrapped into an [`ErrorRecord`]
//! at this boundary and never travel further as bare integers.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::controls::Control;
use crate::ldap::{ConnState, RequestId};

/// Type alias for the crate-wide `Result`.
pub type Result<T> = std::result::Result<T, LdapError>;

/// Coarse classification of failures.
///
/// `Success` and `Unknown` exist so that the status mapper is total: a
/// recognized non-error code maps to `Success`, and an unrecognized code
/// is reported as `Unknown` instead of being dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not an error.
    Success,
    /// Connection setup, state machine, or transport-session failures.
    Connection,
    /// Authentication failures, including invalid credentials.
    Auth,
    /// Malformed requests, validation failures, transport-level decode
    /// errors, and timeouts.
    Protocol,
    /// Memory and other resource exhaustion.
    Resource,
    /// Result code not recognized by the mapper.
    Unknown,
}

/// A protocol status code wrapped with its classification and a
/// human-readable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Raw protocol result code.
    pub rc: u32,
    /// Coarse kind, per [`map_status`].
    pub kind: ErrorKind,
    /// Descriptive message.
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(f, "rc={} ({})", self.rc, self.message)
    }
}

/// Classify a protocol result code.
///
/// Pure function: no side effects, total over `u32`. Codes 81 (serverDown),
/// 85 (timeout) and 90 (noMemory) come from the client-side extension of the
/// result code space used by C libldap; servers don't send them, but a
/// native-session adapter may surface them through the same funnel.
pub fn map_status(rc: u32) -> ErrorRecord {
    let kind = match rc {
        0 => ErrorKind::Success,
        7 | 8 | 13 | 14 | 48 | 49 | 50 => ErrorKind::Auth,
        51 | 52 | 81 => ErrorKind::Connection,
        90 => ErrorKind::Resource,
        rc if result_code_name(rc) != "unknown" => ErrorKind::Protocol,
        _ => ErrorKind::Unknown,
    };
    let message = match kind {
        ErrorKind::Unknown => format!("unrecognized result code {}", rc),
        _ => result_code_name(rc).to_owned(),
    };
    ErrorRecord { rc, kind, message }
}

/// Standard name of a result code, per RFC 4511, Appendix A.1.
pub fn result_code_name(rc: u32) -> &'static str {
    match rc {
        0 => "success",
        1 => "operationsError",
        2 => "protocolError",
        3 => "timeLimitExceeded",
        4 => "sizeLimitExceeded",
        5 => "compareFalse",
        6 => "compareTrue",
        7 => "authMethodNotSupported",
        8 => "strongerAuthRequired",
        10 => "referral",
        11 => "adminLimitExceeded",
        12 => "unavailableCriticalExtension",
        13 => "confidentialityRequired",
        14 => "saslBindInProgress",
        16 => "noSuchAttribute",
        17 => "undefinedAttributeType",
        18 => "inappropriateMatching",
        19 => "constraintViolation",
        20 => "attributeOrValueExists",
        21 => "invalidAttributeSyntax",
        32 => "noSuchObject",
        33 => "aliasProblem",
        34 => "invalidDNSyntax",
        36 => "aliasDereferencingProblem",
        48 => "inappropriateAuthentication",
        49 => "invalidCredentials",
        50 => "insufficientAccessRights",
        51 => "busy",
        52 => "unavailable",
        53 => "unwillingToPerform",
        54 => "loopDetect",
        64 => "namingViolation",
        65 => "objectClassViolation",
        66 => "notAllowedOnNonLeaf",
        67 => "notAllowedOnRDN",
        68 => "entryAlreadyExists",
        69 => "objectClassModsProhibited",
        71 => "affectsMultipleDSAs",
        80 => "other",
        81 => "serverDown",
        85 => "timeout",
        88 => "abandoned",
        90 => "noMemory",
        _ => "unknown",
    }
}

/// Error variants returned by the engine.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Malformed LDAP URL.
    #[error("url parsing error: {source}")]
    UrlParsing {
        #[from]
        source: url::ParseError,
    },

    /// URL scheme other than `ldap`.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// URL without a usable host part.
    #[error("missing host in URL")]
    MissingHost,

    /// I/O error on the underlying transport.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Operation attempted in a connection state which doesn't permit it.
    #[error("operation not permitted in connection state {0:?}")]
    InvalidState(ConnState),

    /// A Bind is already outstanding on this connection.
    #[error("bind already in progress on this connection")]
    BindInProgress,

    /// Raw search scope value outside the `0..=2` range.
    #[error("invalid search scope value: {0}")]
    InvalidScopeValue(i32),

    /// Search filter could not be parsed.
    #[error("filter parsing error")]
    FilterParsing,

    /// Add modification with an empty value set.
    #[error("empty value set for Add")]
    AddEmptyValueSet,

    /// Control OID is not well-formed dotted-decimal.
    #[error("malformed control OID: {0}")]
    InvalidOid(String),

    /// Poll for a message ID which was never issued or whose result has
    /// already been consumed.
    #[error("unknown message ID: {0}")]
    UnknownMessageId(RequestId),

    /// Poll for a message ID that was abandoned or timed out.
    #[error("abandoned message ID: {0}")]
    AbandonedMessageId(RequestId),

    /// The connection driver has terminated.
    #[error("end of stream")]
    EndOfStream,

    /// Response bytes could not be decoded as a BER envelope.
    #[error("BER decoding error: {0}")]
    DecodingError(&'static str),

    /// Operation-level timeout enforced by the polling scheduler.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success result returned by the server.
    #[error("LDAP operation result: {record}, text: \"{}\"", .result.text)]
    OpResult {
        record: ErrorRecord,
        result: LdapResult,
    },
}

impl LdapError {
    /// Coarse kind of this error, per the taxonomy of [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        use LdapError::*;
        match self {
            UrlParsing { .. } | UnsupportedScheme(_) | MissingHost | Io { .. }
            | InvalidState(_) => ErrorKind::Connection,
            BindInProgress => ErrorKind::Auth,
            InvalidScopeValue(_) | FilterParsing | AddEmptyValueSet | InvalidOid(_)
            | UnknownMessageId(_) | AbandonedMessageId(_) | DecodingError(_)
            | Timeout(_) | EndOfStream => ErrorKind::Protocol,
            OpResult { record, .. } => record.kind,
        }
    }
}

impl From<LdapResult> for LdapError {
    fn from(result: LdapResult) -> LdapError {
        LdapError::OpResult {
            record: map_status(result.rc),
            result,
        }
    }
}

/// Common components of an LDAP operation result.
///
/// This structure faithfully replicates the components dictated by the
/// standard. The raw result code is kept because non-zero codes can be a
/// legitimate part of query design; [`success()`](#method.success) and the
/// status mapper provide the ergonomic path.
#[derive(Clone, Debug)]
pub struct LdapResult {
    /// Result code.
    pub rc: u32,
    /// Matched component DN, where applicable.
    pub matched: String,
    /// Additional diagnostic text.
    pub text: String,
    /// Referrals accumulated during the operation.
    pub refs: Vec<HashSet<String>>,
    /// Response controls. Missing and empty controls are both represented
    /// by an empty vector.
    pub ctrls: Vec<Control>,
}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(
            f,
            "rc={} ({}), dn: \"{}\", text: \"{}\"",
            self.rc,
            result_code_name(self.rc),
            self.matched,
            self.text
        )
    }
}

impl LdapResult {
    /// If the result code is zero, return the instance itself wrapped
    /// in `Ok()`, otherwise convert it into an [`LdapError`].
    pub fn success(self) -> Result<Self> {
        if self.rc == 0 {
            Ok(self)
        } else {
            Err(LdapError::from(self))
        }
    }

    /// If the result code is 0 or 10 (referral), return the instance
    /// itself wrapped in `Ok()`, otherwise convert it into an [`LdapError`].
    pub fn non_error(self) -> Result<Self> {
        if self.rc == 0 || self.rc == 10 {
            Ok(self)
        } else {
            Err(LdapError::from(self))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapper_is_total() {
        for rc in 0..200 {
            let rec = map_status(rc);
            assert_eq!(rec.rc, rc);
            assert!(!rec.message.is_empty());
        }
    }

    #[test]
    fn status_mapper_kinds() {
        assert_eq!(map_status(0).kind, ErrorKind::Success);
        assert_eq!(map_status(49).kind, ErrorKind::Auth);
        assert_eq!(map_status(48).kind, ErrorKind::Auth);
        assert_eq!(map_status(32).kind, ErrorKind::Protocol);
        assert_eq!(map_status(3).kind, ErrorKind::Protocol);
        assert_eq!(map_status(2).kind, ErrorKind::Protocol);
        assert_eq!(map_status(51).kind, ErrorKind::Connection);
        assert_eq!(map_status(81).kind, ErrorKind::Connection);
        assert_eq!(map_status(90).kind, ErrorKind::Resource);
    }

    #[test]
    fn unrecognized_code_is_not_dropped() {
        let rec = map_status(199);
        assert_eq!(rec.kind, ErrorKind::Unknown);
        assert!(rec.message.contains("199"));
    }

    #[test]
    fn referral_result_is_non_error() {
        let res = LdapResult {
            rc: 10,
            matched: String::new(),
            text: String::new(),
            refs: vec![],
            ctrls: vec![],
        };
        assert!(res.clone().non_error().is_ok());
        assert!(res.success().is_err());
    }

    #[test]
    fn result_into_error_keeps_code() {
        let res = LdapResult {
            rc: 49,
            matched: String::new(),
            text: "invalid credentials".to_owned(),
            refs: vec![],
            ctrls: vec![],
        };
        let err = LdapError::from(res);
        assert_eq!(err.kind(), ErrorKind::Auth);
        match err {
            LdapError::OpResult { record, result } => {
                assert_eq!(record.rc, 49);
                assert_eq!(result.text, "invalid credentials");
            }
            other => panic!("unexpected error variant: {:?}", other),
        }
    }
}
