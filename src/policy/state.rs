//! Assertions that bind the session to platform state: PCR values,
//! locality, NV contents, the clock and the command being authorized.

use tracing::warn;

use super::compare::{check_condition, check_operand_size};
use super::PolicyEngine;
use crate::auth_session::PolicySession;
use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::hash_chain::HashChain;
use crate::providers::TimeInfo;
use crate::tpm_structure::{TpmEnum, TpmMarshaller};
use crate::tpm_types::*;

/// Arguments of PolicyNV
#[derive(Debug, Clone)]
pub struct PolicyNvParams {
    /// Handle authorizing the read
    pub auth_handle: TPM_HANDLE,
    pub nv_index: TPM_HANDLE,
    pub operand_b: Vec<u8>,
    pub offset: u16,
    pub operation: TPM_EO,
}

/// Arguments of PolicyCounterTimer
#[derive(Debug, Clone)]
pub struct PolicyCounterTimerParams {
    pub operand_b: Vec<u8>,
    /// Offset into the marshaled TPMS_TIME_INFO
    pub offset: u16,
    pub operation: TPM_EO,
}

/// argsHash = H(operandB || offset || operation)
fn args_hash(
    hash_alg: TPM_ALG_ID,
    operand_b: &[u8],
    offset: u16,
    operation: TPM_EO,
) -> Result<Vec<u8>, TpmError> {
    let mut chain = HashChain::start(hash_alg)?;
    chain
        .update(operand_b)
        .update_u16(offset)
        .update_u16(operation.get_value());
    Ok(chain.finish())
}

impl<'a> PolicyEngine<'a> {
    /// Bind the policy to the current values of the selected PCRs.
    ///
    /// A trial session takes `pcr_digest` as given when one is supplied.
    pub fn policy_pcr(
        &self,
        session: &mut PolicySession,
        pcr_digest: &[u8],
        pcrs: &TPML_PCR_SELECTION,
    ) -> Result<(), TpmError> {
        let checks = self.begin(TPM_CC::PolicyPCR, session)?;
        if !pcr_digest.is_empty() && pcr_digest.len() != session.digest_size() {
            return Err(TpmError::SizeMismatch {
                what: "pcrDigest",
                expected: session.digest_size(),
                actual: pcr_digest.len(),
            });
        }
        let selection = pcrs.to_bytes()?;
        let provider = self.platform.pcrs;

        let (digest, generation) = if checks.is_enforced() {
            let generation = provider.current_generation();
            let current = provider.composite_digest(pcrs, session.hash_alg())?;
            if provider.current_generation() != generation {
                warn!("PCR state changed while computing the composite digest");
                return Err(TpmError::PcrChanged);
            }
            if !pcr_digest.is_empty() && !Crypto::digests_equal(pcr_digest, &current) {
                return Err(TpmError::PcrDigestMismatch);
            }
            (current, Some(generation))
        } else if pcr_digest.is_empty() {
            (provider.composite_digest(pcrs, session.hash_alg())?, None)
        } else {
            (pcr_digest.to_vec(), None)
        };

        session.extend(TPM_CC::PolicyPCR, &[selection.as_slice(), digest.as_slice()])?;
        if generation.is_some() {
            session.pcr_generation = generation;
        }
        self.accepted(TPM_CC::PolicyPCR, session);
        Ok(())
    }

    /// Restrict the localities that may use the session.
    ///
    /// Normal localities narrow by intersection. An extended locality must
    /// repeat exactly. The two forms never combine.
    pub fn policy_locality(
        &self,
        session: &mut PolicySession,
        locality: TPMA_LOCALITY,
    ) -> Result<(), TpmError> {
        self.begin(TPM_CC::PolicyLocality, session)?;
        let requested = locality.get_value();
        if requested == 0 {
            return Err(TpmError::OutOfRange("locality"));
        }

        let current = session.locality;
        let conflict = TpmError::LocalityConflict { current, requested };
        let combined = if locality.is_extended() {
            if current != 0 && current != requested {
                return Err(conflict);
            }
            requested
        } else {
            if TPMA_LOCALITY(current).is_extended() {
                return Err(conflict);
            }
            let base = if current == 0 {
                TPMA_LOCALITY::ALL_NORMAL
            } else {
                current
            };
            match base & requested {
                0 => return Err(conflict),
                narrowed => narrowed,
            }
        };

        session.extend(TPM_CC::PolicyLocality, &[[requested].as_slice()])?;
        session.locality = combined;
        self.accepted(TPM_CC::PolicyLocality, session);
        Ok(())
    }

    /// Condition the policy on the contents of an NV index.
    pub fn policy_nv(
        &self,
        session: &mut PolicySession,
        params: &PolicyNvParams,
    ) -> Result<(), TpmError> {
        let checks = self.begin(TPM_CC::PolicyNV, session)?;
        check_operand_size(&params.operand_b)?;

        checks.run(|| {
            let nv = self.platform.nv;
            nv.read_access_check(&params.auth_handle, &params.nv_index)?;
            let size = nv.data_size(&params.nv_index)?;
            if params.offset > size {
                return Err(TpmError::OutOfRange("offset"));
            }
            let available = usize::from(size - params.offset);
            if available < params.operand_b.len() {
                return Err(TpmError::SizeMismatch {
                    what: "operandB",
                    expected: available,
                    actual: params.operand_b.len(),
                });
            }
            let operand_a =
                nv.read(&params.nv_index, params.offset, params.operand_b.len() as u16)?;
            if !check_condition(params.operation, &operand_a, &params.operand_b)? {
                return Err(TpmError::PolicyCheckFailed);
            }
            Ok(())
        })?;

        let nv_name = self.platform.names.name_of(&params.nv_index)?;
        let args = args_hash(
            session.hash_alg(),
            &params.operand_b,
            params.offset,
            params.operation,
        )?;
        session.extend(TPM_CC::PolicyNV, &[args.as_slice(), nv_name.as_slice()])?;
        self.accepted(TPM_CC::PolicyNV, session);
        Ok(())
    }

    /// Condition the policy on the platform clock and counters.
    pub fn policy_counter_timer(
        &self,
        session: &mut PolicySession,
        params: &PolicyCounterTimerParams,
    ) -> Result<(), TpmError> {
        let checks = self.begin(TPM_CC::PolicyCounterTimer, session)?;
        check_operand_size(&params.operand_b)?;
        let offset = usize::from(params.offset);
        if offset >= TimeInfo::MARSHALED_SIZE {
            return Err(TpmError::OutOfRange("offset"));
        }
        if offset + params.operand_b.len() > TimeInfo::MARSHALED_SIZE {
            return Err(TpmError::OutOfRange("operandB"));
        }

        checks.run(|| {
            let clock = self.platform.clock;
            if offset < TimeInfo::COUNTERS_END && !clock.available() {
                return Err(TpmError::ClockUnavailable);
            }
            let info = clock.marshaled_snapshot();
            let operand_a = info
                .get(offset..offset + params.operand_b.len())
                .ok_or(TpmError::OutOfRange("offset"))?;
            if !check_condition(params.operation, operand_a, &params.operand_b)? {
                return Err(TpmError::PolicyCheckFailed);
            }
            Ok(())
        })?;

        let args = args_hash(
            session.hash_alg(),
            &params.operand_b,
            params.offset,
            params.operation,
        )?;
        session.extend(TPM_CC::PolicyCounterTimer, &[args.as_slice()])?;
        self.accepted(TPM_CC::PolicyCounterTimer, session);
        Ok(())
    }

    /// Limit the session to authorizing one command.
    pub fn policy_command_code(
        &self,
        session: &mut PolicySession,
        code: u32,
    ) -> Result<(), TpmError> {
        self.begin(TPM_CC::PolicyCommandCode, session)?;
        let command = TPM_CC::lookup(code).ok_or(TpmError::UnrecognizedCommand(code))?;
        session.check_command_code(code)?;

        session.extend(TPM_CC::PolicyCommandCode, &[code.to_be_bytes().as_slice()])?;
        session.bound_command = Some(command);
        self.accepted(TPM_CC::PolicyCommandCode, session);
        Ok(())
    }
}
