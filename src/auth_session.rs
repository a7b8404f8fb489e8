use derivative::Derivative;
use tracing::trace;

use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::hash_chain::HashChain;
use crate::tpm_structure::TpmEnum;
use crate::tpm_types::*;

/// Which assertion owns the bound parameter hash slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterHashKind {
    CpHash,
    NameHash,
    TemplateHash,
    DuplicationSelect,
}

/// The shared parameter hash slot, tagged with its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParameterHash {
    pub kind: ParameterHashKind,
    pub digest: Vec<u8>,
}

/// Boolean session attributes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PolicyFlags {
    pub is_trial: bool,
    pub auth_value_needed: bool,
    pub password_needed: bool,
    pub physical_presence_required: bool,
    pub check_nv_written: bool,
    pub nv_written_expected: bool,
}

/// State of one open policy session.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct PolicySession {
    hash_alg: TPM_ALG_ID,
    policy_digest: Vec<u8>,
    pub(crate) bound_command: Option<TPM_CC>,
    pub(crate) bound_parameter_hash: Option<BoundParameterHash>,
    pub(crate) pcr_generation: Option<u32>,
    /// Canonical locality byte, 0 while unrestricted
    pub(crate) locality: u8,
    pub(crate) flags: PolicyFlags,
    #[derivative(Debug = "ignore")]
    nonce_tpm: Vec<u8>,
    start_time: u64,
    epoch: u64,
    /// Earliest accepted authorization expiry in ms, 0 when none
    pub(crate) timeout: u64,
}

impl PolicySession {
    /// Open a policy session with a zero digest.
    pub fn new(
        hash_alg: TPM_ALG_ID,
        is_trial: bool,
        nonce_tpm: Vec<u8>,
        start_time: u64,
        epoch: u64,
    ) -> Result<Self, TpmError> {
        let size = Crypto::digest_size(hash_alg);
        if size == 0 {
            return Err(TpmError::NotSupported(format!(
                "Unsupported hash algorithm: {:?}",
                hash_alg
            )));
        }
        Ok(PolicySession {
            hash_alg,
            policy_digest: vec![0; size],
            bound_command: None,
            bound_parameter_hash: None,
            pcr_generation: None,
            locality: 0,
            flags: PolicyFlags {
                is_trial,
                ..PolicyFlags::default()
            },
            nonce_tpm,
            start_time,
            epoch,
            timeout: 0,
        })
    }

    /// A trial session with no nonce, for computing policy digests offline
    pub fn trial(hash_alg: TPM_ALG_ID) -> Result<Self, TpmError> {
        Self::new(hash_alg, true, Vec::new(), 0, 0)
    }

    pub fn hash_alg(&self) -> TPM_ALG_ID {
        self.hash_alg
    }

    pub fn digest_size(&self) -> usize {
        self.policy_digest.len()
    }

    pub fn policy_digest(&self) -> &[u8] {
        &self.policy_digest
    }

    pub fn is_trial(&self) -> bool {
        self.flags.is_trial
    }

    pub fn flags(&self) -> PolicyFlags {
        self.flags
    }

    pub fn bound_command(&self) -> Option<TPM_CC> {
        self.bound_command
    }

    pub fn bound_parameter_hash(&self) -> Option<&BoundParameterHash> {
        self.bound_parameter_hash.as_ref()
    }

    pub fn pcr_generation(&self) -> Option<u32> {
        self.pcr_generation
    }

    /// Locality restriction, `None` while any locality may use the session
    pub fn locality(&self) -> Option<TPMA_LOCALITY> {
        (self.locality != 0).then_some(TPMA_LOCALITY(self.locality))
    }

    pub fn nonce_tpm(&self) -> &[u8] {
        &self.nonce_tpm
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Earliest expiry of any time-limited authorization in the policy
    pub fn timeout(&self) -> Option<u64> {
        (self.timeout != 0).then_some(self.timeout)
    }

    /// True once a time-limited authorization in this policy has lapsed
    pub fn is_expired(&self, now: u64, epoch: u64) -> bool {
        self.timeout != 0 && (now > self.timeout || epoch != self.epoch)
    }

    fn digest_from(&self, base: &[u8], command_code: TPM_CC, args: &[&[u8]]) -> Result<Vec<u8>, TpmError> {
        let mut chain = HashChain::start(self.hash_alg)?;
        chain.update(base).update_u32(command_code.get_value());
        for arg in args {
            chain.update(arg);
        }
        Ok(chain.finish())
    }

    fn context_digest_from(
        &self,
        base: &[u8],
        command_code: TPM_CC,
        name: &[u8],
        policy_ref: &[u8],
    ) -> Result<Vec<u8>, TpmError> {
        let first = self.digest_from(base, command_code, &[name])?;
        let mut second = HashChain::start(self.hash_alg)?;
        second.update(&first).update(policy_ref);
        Ok(second.finish())
    }

    /// `policyDigest = H(policyDigest || commandCode || args...)`
    pub(crate) fn extend(&mut self, command_code: TPM_CC, args: &[&[u8]]) -> Result<(), TpmError> {
        self.policy_digest = self.digest_from(&self.policy_digest, command_code, args)?;
        trace!(command = command_code.name(), "policy digest extended");
        Ok(())
    }

    /// `policyDigest = H(0...0 || commandCode || args...)`
    pub(crate) fn rebase(&mut self, command_code: TPM_CC, args: &[&[u8]]) -> Result<(), TpmError> {
        let zero = vec![0u8; self.digest_size()];
        self.policy_digest = self.digest_from(&zero, command_code, args)?;
        trace!(command = command_code.name(), "policy digest rebased");
        Ok(())
    }

    /// `policyDigest = H(H(policyDigest || commandCode || name) || policyRef)`
    ///
    /// The second step runs even for an empty `policy_ref`.
    pub(crate) fn context_update(
        &mut self,
        command_code: TPM_CC,
        name: &[u8],
        policy_ref: &[u8],
    ) -> Result<(), TpmError> {
        self.policy_digest =
            self.context_digest_from(&self.policy_digest, command_code, name, policy_ref)?;
        trace!(command = command_code.name(), "policy context updated");
        Ok(())
    }

    /// Context update starting from a zero digest
    pub(crate) fn rebase_context(
        &mut self,
        command_code: TPM_CC,
        name: &[u8],
        policy_ref: &[u8],
    ) -> Result<(), TpmError> {
        let zero = vec![0u8; self.digest_size()];
        self.policy_digest = self.context_digest_from(&zero, command_code, name, policy_ref)?;
        trace!(command = command_code.name(), "policy context rebased");
        Ok(())
    }

    fn clear_digest(&mut self) {
        self.policy_digest.iter_mut().for_each(|b| *b = 0);
    }

    /// Record a time limit, keeping the earliest
    pub(crate) fn lower_timeout(&mut self, timeout: u64) {
        if timeout != 0 && (self.timeout == 0 || self.timeout > timeout) {
            self.timeout = timeout;
        }
    }

    /// Check the shared parameter hash slot for `kind`/`digest`.
    ///
    /// Returns `Ok(true)` when the slot already holds exactly this binding.
    pub(crate) fn check_parameter_hash(
        &self,
        kind: ParameterHashKind,
        digest: &[u8],
    ) -> Result<bool, TpmError> {
        match &self.bound_parameter_hash {
            None => Ok(false),
            Some(bound) if bound.kind == kind && Crypto::digests_equal(&bound.digest, digest) => {
                Ok(true)
            }
            Some(bound) => Err(TpmError::ParameterHashConflict {
                bound: bound.kind,
                requested: kind,
            }),
        }
    }

    pub(crate) fn bind_parameter_hash(&mut self, kind: ParameterHashKind, digest: Vec<u8>) {
        self.bound_parameter_hash = Some(BoundParameterHash { kind, digest });
    }

    /// Fail if the session is bound to a command other than `command_code`
    pub(crate) fn check_command_code(&self, command_code: u32) -> Result<(), TpmError> {
        match self.bound_command {
            Some(bound) if bound.get_value() != command_code => Err(TpmError::CommandCodeMismatch {
                bound,
                requested: command_code,
            }),
            _ => Ok(()),
        }
    }

    /// Clear all policy state except the session identity (PolicyRestart)
    pub(crate) fn reset_policy(&mut self) {
        self.clear_digest();
        self.bound_command = None;
        self.bound_parameter_hash = None;
        self.pcr_generation = None;
        self.locality = 0;
        self.timeout = 0;
        self.flags = PolicyFlags {
            is_trial: self.flags.is_trial,
            ..PolicyFlags::default()
        };
    }
}
