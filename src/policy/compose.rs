//! PolicyOR, PolicyAuthorize and PolicyAuthorizeNV.
//!
//! These replace the accumulated digest instead of extending it, which is
//! what lets one policy stand in for several others.

use tracing::warn;

use super::PolicyEngine;
use crate::auth_session::PolicySession;
use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::hash_chain::HashChain;
use crate::ticket::VerifiedTicket;
use crate::tpm_buffer::TpmBuffer;
use crate::tpm_structure::TpmMarshaller;
use crate::tpm_types::*;

/// Arguments of PolicyAuthorize
#[derive(Debug, Clone)]
pub struct PolicyAuthorizeParams {
    /// Policy digest the authority signed
    pub approved_policy: Vec<u8>,
    pub policy_ref: Vec<u8>,
    /// Name of the authority's signing key
    pub key_sign: Vec<u8>,
    /// Proof that the approval signature was checked
    pub check_ticket: VerifiedTicket,
}

/// Arguments of PolicyAuthorizeNV
#[derive(Debug, Clone, Copy)]
pub struct PolicyAuthorizeNvParams {
    pub auth_handle: TPM_HANDLE,
    pub nv_index: TPM_HANDLE,
}

impl<'a> PolicyEngine<'a> {
    /// Accept the session if its digest is any of `hash_list`.
    ///
    /// The new digest is `H(0 || CC || D1 || ... || Dn)`.
    pub fn policy_or(
        &self,
        session: &mut PolicySession,
        hash_list: &[Vec<u8>],
    ) -> Result<(), TpmError> {
        let checks = self.begin(TPM_CC::PolicyOR, session)?;
        if hash_list.len() < 2 || hash_list.len() > self.config.max_or_branches {
            return Err(TpmError::OutOfRange("pHashList"));
        }
        if let Some(branch) = hash_list.iter().find(|d| d.len() != session.digest_size()) {
            return Err(TpmError::SizeMismatch {
                what: "pHashList",
                expected: session.digest_size(),
                actual: branch.len(),
            });
        }

        checks.run(|| {
            let current = session.policy_digest();
            if !hash_list.iter().any(|d| Crypto::digests_equal(d, current)) {
                return Err(TpmError::DigestNotInList);
            }
            Ok(())
        })?;

        let branches: Vec<&[u8]> = hash_list.iter().map(Vec::as_slice).collect();
        session.rebase(TPM_CC::PolicyOR, &branches)?;
        self.accepted(TPM_CC::PolicyOR, session);
        Ok(())
    }

    /// Replace the session digest with a policy approved by a signing
    /// authority.
    pub fn policy_authorize(
        &self,
        session: &mut PolicySession,
        params: &PolicyAuthorizeParams,
    ) -> Result<(), TpmError> {
        let checks = self.begin(TPM_CC::PolicyAuthorize, session)?;
        let key_alg = TPMT_HA::from_name(&params.key_sign)?.hash_alg;

        checks.run(|| {
            if !Crypto::digests_equal(&params.approved_policy, session.policy_digest()) {
                return Err(TpmError::ApprovedPolicyMismatch);
            }
            let mut chain = HashChain::start(key_alg)?;
            chain
                .update(&params.approved_policy)
                .update(&params.policy_ref);
            let a_hash = chain.finish();

            let ticket = &params.check_ticket;
            let expected =
                self.tickets
                    .compute_verified(ticket.hierarchy, &a_hash, &params.key_sign)?;
            if ticket.is_null()
                || expected.is_null()
                || !Crypto::digests_equal(&expected.digest, &ticket.digest)
            {
                warn!(hierarchy = ?ticket.hierarchy, "PolicyAuthorize ticket rejected");
                return Err(TpmError::TicketMismatch);
            }
            Ok(())
        })?;

        session.rebase_context(TPM_CC::PolicyAuthorize, &params.key_sign, &params.policy_ref)?;
        self.accepted(TPM_CC::PolicyAuthorize, session);
        Ok(())
    }

    /// Replace the session digest with the policy stored in an NV index.
    pub fn policy_authorize_nv(
        &self,
        session: &mut PolicySession,
        params: &PolicyAuthorizeNvParams,
    ) -> Result<(), TpmError> {
        let checks = self.begin(TPM_CC::PolicyAuthorizeNV, session)?;

        checks.run(|| {
            let nv = self.platform.nv;
            nv.read_access_check(&params.auth_handle, &params.nv_index)?;
            let size = nv.data_size(&params.nv_index)?.min(TPMT_HA::MAX_SIZE as u16);
            let contents = nv.read(&params.nv_index, 0, size)?;
            let policy = TPMT_HA::from_tpm(&mut TpmBuffer::from_bytes(&contents))?;
            if policy.hash_alg != session.hash_alg() {
                return Err(TpmError::HashAlgMismatch);
            }
            if !Crypto::digests_equal(&policy.digest, session.policy_digest()) {
                return Err(TpmError::ApprovedPolicyMismatch);
            }
            Ok(())
        })?;

        let nv_name = self.platform.names.name_of(&params.nv_index)?;
        session.rebase(TPM_CC::PolicyAuthorizeNV, &[nv_name.as_slice()])?;
        self.accepted(TPM_CC::PolicyAuthorizeNV, session);
        Ok(())
    }
}
