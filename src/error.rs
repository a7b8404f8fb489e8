//! Error types for policy session operations

use thiserror::Error;

use crate::auth_session::ParameterHashKind;
use crate::tpm_types::TPM_CC;

/// Broad classification of a policy failure.
///
/// Every [`TpmError`] maps to exactly one kind. Trial sessions suppress only
/// the validation half of [`ErrorKind::ExternalStateMismatch`] and
/// [`ErrorKind::Cryptographic`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A session slot is already bound to a different value or kind
    BindingConflict,
    /// Nonce mismatch, stale expiration or changed clock epoch
    Freshness,
    /// Signature or ticket mismatch, unsupported scheme or algorithm
    Cryptographic,
    /// PCR, NV or clock comparison failed
    ExternalStateMismatch,
    /// Oversized operand, out-of-bounds offset, malformed input
    RangeOrSize,
    /// Digest not found in an OR list, approved-policy mismatch
    PolicyMembership,
    /// Clock not available, index inaccessible, no free session slot
    ResourceUnavailable,
}

/// TPM Error types
#[derive(Debug, Error)]
pub enum TpmError {
    /// Session is already bound to another command code
    #[error("session is bound to {bound:?}, cannot bind 0x{requested:08X}")]
    CommandCodeMismatch { bound: TPM_CC, requested: u32 },

    /// The shared parameter-hash slot is owned by a different kind or value
    #[error("parameter hash slot holds {bound:?}, rejected {requested:?}")]
    ParameterHashConflict {
        bound: ParameterHashKind,
        requested: ParameterHashKind,
    },

    /// Requested locality cannot be combined with the current restriction
    #[error("locality 0x{requested:02X} conflicts with restriction 0x{current:02X}")]
    LocalityConflict { current: u8, requested: u8 },

    /// PolicyNvWritten was asserted twice with different expectations
    #[error("NV written state already required to be {0}")]
    NvWrittenConflict(bool),

    /// Presented nonce does not equal the session nonce
    #[error("nonce does not match the session nonce")]
    NonceMismatch,

    /// Authorization time limit has passed or the clock epoch changed
    #[error("authorization expired")]
    Expired,

    /// Signature did not verify over the recomputed digest
    #[error("signature check failed")]
    SignatureMismatch,

    /// Re-derived ticket digest differs from the presented one
    #[error("ticket check failed")]
    TicketMismatch,

    /// Signing scheme has no usable digest
    #[error("unsupported signature scheme")]
    UnsupportedScheme,

    /// Tickets stand in for interactive proof and are refused on trial sessions
    #[error("tickets cannot be redeemed in a trial session")]
    TrialSessionTicket,

    /// Algorithm or feature not supported
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Comparison against NV or clock contents did not hold
    #[error("policy condition not satisfied")]
    PolicyCheckFailed,

    /// PCR state changed after the session was bound to it
    #[error("PCR state changed since the policy was bound")]
    PcrChanged,

    /// Supplied PCR digest does not match the current PCR values
    #[error("PCR digest mismatch")]
    PcrDigestMismatch,

    /// Policy stored in an NV index uses a different hash algorithm
    #[error("policy algorithm in NV index does not match the session")]
    HashAlgMismatch,

    /// Input has the wrong length
    #[error("{what}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Offset, count or value outside the permitted range
    #[error("{0} out of range")]
    OutOfRange(&'static str),

    /// Buffer underflow occurred during deserialization
    #[error("buffer underflow during deserialization")]
    BufferUnderflow,

    /// Invalid enum value
    #[error("invalid {type_name} value 0x{value:X}")]
    InvalidEnumValue { type_name: &'static str, value: u64 },

    /// Command code is not a command this platform implements
    #[error("unrecognized command code 0x{0:08X}")]
    UnrecognizedCommand(u32),

    /// Current policy digest is not one of the OR branches
    #[error("policy digest not found in OR list")]
    DigestNotInList,

    /// Approved policy (signed or stored in NV) is not the current digest
    #[error("approved policy does not match the session digest")]
    ApprovedPolicyMismatch,

    /// Clock is not running, time-based checks cannot be made
    #[error("clock is not available")]
    ClockUnavailable,

    /// NV index read access was refused
    #[error("NV access refused: {0}")]
    NvAccess(String),

    /// Session handle does not refer to an open session
    #[error("invalid session handle")]
    InvalidHandle,

    /// Session table is full
    #[error("no free session slots")]
    SessionTableFull,
}

impl TpmError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CommandCodeMismatch { .. }
            | Self::ParameterHashConflict { .. }
            | Self::LocalityConflict { .. }
            | Self::NvWrittenConflict(_) => ErrorKind::BindingConflict,
            Self::NonceMismatch | Self::Expired => ErrorKind::Freshness,
            Self::SignatureMismatch
            | Self::TicketMismatch
            | Self::UnsupportedScheme
            | Self::TrialSessionTicket
            | Self::NotSupported(_) => ErrorKind::Cryptographic,
            Self::PolicyCheckFailed
            | Self::PcrChanged
            | Self::PcrDigestMismatch
            | Self::HashAlgMismatch => ErrorKind::ExternalStateMismatch,
            Self::SizeMismatch { .. }
            | Self::OutOfRange(_)
            | Self::BufferUnderflow
            | Self::InvalidEnumValue { .. }
            | Self::UnrecognizedCommand(_) => ErrorKind::RangeOrSize,
            Self::DigestNotInList | Self::ApprovedPolicyMismatch => ErrorKind::PolicyMembership,
            Self::ClockUnavailable
            | Self::NvAccess(_)
            | Self::InvalidHandle
            | Self::SessionTableFull => ErrorKind::ResourceUnavailable,
        }
    }
}
