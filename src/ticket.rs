//! Authorization tickets and the packed timeout that travels with them.
//!
//! A ticket is an HMAC keyed with a hierarchy proof. Nothing is stored when a
//! ticket is issued: redemption recomputes the HMAC from the presented
//! fields and compares.

use tracing::debug;

use crate::auth_session::{ParameterHashKind, PolicySession};
use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::providers::{ClockProvider, HierarchyProofs};
use crate::tpm_buffer::TpmBuffer;
use crate::tpm_structure::TpmEnum;
use crate::tpm_types::*;

/// Top bit of the packed timeout
const EXPIRATION_BIT: u64 = 1 << 63;

/// Largest timeout the packed form can carry
const MAX_TIMEOUT: u64 = EXPIRATION_BIT - 1;

/// Timeout with the "expires on reset" flag folded into the top bit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PackedTimeout {
    pub timeout: u64,
    pub expires_on_reset: bool,
}

impl PackedTimeout {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> u64 {
        let value = self.timeout & !EXPIRATION_BIT;
        if self.expires_on_reset {
            value | EXPIRATION_BIT
        } else {
            value
        }
    }

    pub fn decode(packed: u64) -> Self {
        PackedTimeout {
            timeout: packed & !EXPIRATION_BIT,
            expires_on_reset: packed & EXPIRATION_BIT != 0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().to_be_bytes().to_vec()
    }

    /// Parse the 8-byte timeout buffer returned alongside a ticket
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TpmError> {
        if bytes.len() != Self::SIZE {
            return Err(TpmError::SizeMismatch {
                what: "timeout",
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let mut buffer = TpmBuffer::from_bytes(bytes);
        Ok(Self::decode(buffer.read_u64()?))
    }
}

/// TPMT_TK_AUTH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTicket {
    /// `TPM_ST::AUTH_SIGNED` or `TPM_ST::AUTH_SECRET`
    pub tag: TPM_ST,
    pub hierarchy: TPM_RH,
    pub digest: Vec<u8>,
}

impl AuthTicket {
    /// The value returned when no ticket is issued
    pub fn null(tag: TPM_ST) -> Self {
        AuthTicket {
            tag,
            hierarchy: TPM_RH::NULL,
            digest: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.hierarchy == TPM_RH::NULL && self.digest.is_empty()
    }

    /// Assertion this ticket substitutes for
    pub fn command_code(&self) -> Result<TPM_CC, TpmError> {
        match self.tag {
            TPM_ST::AUTH_SIGNED => Ok(TPM_CC::PolicySigned),
            TPM_ST::AUTH_SECRET => Ok(TPM_CC::PolicySecret),
            TPM_ST::VERIFIED => Err(TpmError::TicketMismatch),
        }
    }
}

/// TPMT_TK_VERIFIED: proof that this platform checked a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTicket {
    pub hierarchy: TPM_RH,
    pub digest: Vec<u8>,
}

impl VerifiedTicket {
    pub fn null() -> Self {
        VerifiedTicket {
            hierarchy: TPM_RH::NULL,
            digest: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.hierarchy == TPM_RH::NULL && self.digest.is_empty()
    }
}

/// Fields bound into an authorization ticket
#[derive(Debug, Clone, Copy)]
pub struct TicketFields<'a> {
    pub tag: TPM_ST,
    pub hierarchy: TPM_RH,
    pub timeout: PackedTimeout,
    pub cp_hash: &'a [u8],
    pub policy_ref: &'a [u8],
    pub entity_name: &'a [u8],
}

/// Issues and re-derives tickets.
pub struct TicketEngine<'a> {
    proofs: &'a dyn HierarchyProofs,
    clock: &'a dyn ClockProvider,
    hash_alg: TPM_ALG_ID,
}

impl<'a> TicketEngine<'a> {
    pub fn new(
        proofs: &'a dyn HierarchyProofs,
        clock: &'a dyn ClockProvider,
        hash_alg: TPM_ALG_ID,
    ) -> Self {
        TicketEngine {
            proofs,
            clock,
            hash_alg,
        }
    }

    /// Compute the ticket for `fields`.
    ///
    /// A non-zero timeout also binds the clock epoch, and the reset count when
    /// the ticket expires on reset.
    pub fn compute_auth(&self, fields: &TicketFields<'_>) -> Result<AuthTicket, TpmError> {
        let mut buffer = TpmBuffer::new();
        buffer.write_u16(fields.tag.get_value());
        buffer.write_bytes(fields.cp_hash);
        buffer.write_bytes(fields.policy_ref);
        buffer.write_bytes(fields.entity_name);
        buffer.write_u64(fields.timeout.timeout);
        if fields.timeout.timeout != 0 {
            buffer.write_u64(self.clock.epoch());
            if fields.timeout.expires_on_reset {
                buffer.write_u32(self.clock.reset_count());
            }
        }
        let digest = Crypto::hmac(
            self.hash_alg,
            self.proofs.proof(fields.hierarchy),
            buffer.as_bytes(),
        )?;
        Ok(AuthTicket {
            tag: fields.tag,
            hierarchy: fields.hierarchy,
            digest,
        })
    }

    /// Compute the verification ticket for a signature by `key_name` over
    /// `digest`. The NULL hierarchy never gets a real ticket.
    pub fn compute_verified(
        &self,
        hierarchy: TPM_RH,
        digest: &[u8],
        key_name: &[u8],
    ) -> Result<VerifiedTicket, TpmError> {
        if hierarchy == TPM_RH::NULL {
            return Ok(VerifiedTicket::null());
        }
        let mut buffer = TpmBuffer::new();
        buffer.write_u16(TPM_ST::VERIFIED.get_value());
        buffer.write_bytes(digest);
        buffer.write_bytes(key_name);
        Ok(VerifiedTicket {
            hierarchy,
            digest: Crypto::hmac(self.hash_alg, self.proofs.proof(hierarchy), buffer.as_bytes())?,
        })
    }

    /// Re-derive the ticket for `fields` and compare with `presented`
    pub fn check_auth(&self, fields: &TicketFields<'_>, presented: &[u8]) -> Result<(), TpmError> {
        let expected = self.compute_auth(fields)?;
        if !Crypto::digests_equal(&expected.digest, presented) {
            debug!(hierarchy = ?fields.hierarchy, "authorization ticket mismatch");
            return Err(TpmError::TicketMismatch);
        }
        Ok(())
    }

    /// Absolute expiry in ms for an `expiration` given in seconds.
    ///
    /// With a nonce the expiration counts from the session start, otherwise
    /// it is absolute time rounded up by the current sub-second remainder.
    pub fn compute_auth_timeout(&self, session: &PolicySession, expiration: i32, nonce: &[u8]) -> u64 {
        if expiration == 0 {
            return 0;
        }
        let seconds = u64::from(expiration.unsigned_abs()) * 1000;
        let timeout = if nonce.is_empty() {
            seconds + self.clock.time() % 1000
        } else {
            session.start_time().saturating_add(seconds)
        };
        timeout.min(MAX_TIMEOUT)
    }

    /// Validate nonce, time limit and parameter hash for an authorization.
    pub fn parameter_checks(
        &self,
        session: &PolicySession,
        auth_timeout: u64,
        cp_hash: &[u8],
        nonce: &[u8],
    ) -> Result<(), TpmError> {
        if !nonce.is_empty() && !Crypto::digests_equal(nonce, session.nonce_tpm()) {
            return Err(TpmError::NonceMismatch);
        }
        if auth_timeout != 0 {
            if !self.clock.available() {
                return Err(TpmError::ClockUnavailable);
            }
            if auth_timeout < self.clock.time() || session.epoch() != self.clock.epoch() {
                return Err(TpmError::Expired);
            }
        }
        check_cp_hash(session, cp_hash)
    }
}

/// A presented cpHash must be digest-sized and agree with any bound one
pub(crate) fn check_cp_hash(session: &PolicySession, cp_hash: &[u8]) -> Result<(), TpmError> {
    if cp_hash.is_empty() {
        return Ok(());
    }
    if cp_hash.len() != session.digest_size() {
        return Err(TpmError::SizeMismatch {
            what: "cpHashA",
            expected: session.digest_size(),
            actual: cp_hash.len(),
        });
    }
    session.check_parameter_hash(ParameterHashKind::CpHash, cp_hash)?;
    Ok(())
}
