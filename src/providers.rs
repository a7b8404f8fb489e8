//! Narrow interfaces to the platform state a policy session reads.
//!
//! The engine never owns keys, NV contents, PCR banks or the clock. Each is
//! reached through one of these traits so that the same assertion code runs
//! against a real platform or an in-memory fake.

use derivative::Derivative;
use zeroize::Zeroizing;

use crate::error::TpmError;
use crate::tpm_buffer::TpmBuffer;
use crate::tpm_types::*;

/// Checks signatures made by loaded keys.
pub trait SignatureVerifier {
    /// Hash the signer uses for `signature`, or `TPM_ALG_ID::NULL` when the
    /// scheme has no verification digest.
    fn signing_hash(&self, signer: &TPM_HANDLE, signature: &TPMT_SIGNATURE) -> TPM_ALG_ID;

    /// Verify `signature` over `digest`
    fn validate(
        &self,
        signer: &TPM_HANDLE,
        digest: &[u8],
        signature: &TPMT_SIGNATURE,
    ) -> Result<(), TpmError>;
}

/// Maps handles to their names and owning hierarchy.
pub trait NameResolver {
    fn name_of(&self, handle: &TPM_HANDLE) -> Result<Vec<u8>, TpmError>;

    fn hierarchy_of(&self, handle: &TPM_HANDLE) -> TPM_RH;

    /// PIN-pass and PIN-fail indices never get PolicySecret tickets
    fn is_pin_index(&self, _handle: &TPM_HANDLE) -> bool {
        false
    }
}

/// Read side of the NV index store.
pub trait NvStore {
    /// Enforce the index's read authorization and lock state
    fn read_access_check(&self, auth: &TPM_HANDLE, index: &TPM_HANDLE) -> Result<(), TpmError>;

    fn data_size(&self, index: &TPM_HANDLE) -> Result<u16, TpmError>;

    fn read(&self, index: &TPM_HANDLE, offset: u16, len: u16) -> Result<Vec<u8>, TpmError>;
}

pub trait PcrProvider {
    /// Digest of the concatenated values of the selected PCRs
    fn composite_digest(
        &self,
        selection: &TPML_PCR_SELECTION,
        hash_alg: TPM_ALG_ID,
    ) -> Result<Vec<u8>, TpmError>;

    /// Counter bumped whenever any PCR changes
    fn current_generation(&self) -> u32;
}

/// Platform clock and reset counters.
pub trait ClockProvider {
    /// Milliseconds since the current epoch started
    fn time(&self) -> u64;

    /// Changes whenever `time` stops being monotonic (e.g. after power loss)
    fn epoch(&self) -> u64;

    fn reset_count(&self) -> u32;

    /// False while the clock cannot be trusted to advance
    fn available(&self) -> bool;

    /// Marshaled TPMS_TIME_INFO for PolicyCounterTimer comparisons
    fn marshaled_snapshot(&self) -> Vec<u8>;
}

/// Per-hierarchy secret used as the HMAC key for tickets.
pub trait HierarchyProofs {
    fn proof(&self, hierarchy: TPM_RH) -> &[u8];
}

/// Snapshot of TPMS_TIME_INFO
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    pub time: u64,
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
}

impl TimeInfo {
    /// Marshaled length: time, clock, resetCount, restartCount, safe
    pub const MARSHALED_SIZE: usize = 8 + 8 + 4 + 4 + 1;

    /// Offset past the two always-advancing counters
    pub const COUNTERS_END: usize = 16;

    pub fn marshal(&self) -> Vec<u8> {
        let mut buffer = TpmBuffer::new();
        buffer.write_u64(self.time);
        buffer.write_u64(self.clock);
        buffer.write_u32(self.reset_count);
        buffer.write_u32(self.restart_count);
        buffer.write_u8(self.safe as u8);
        buffer.into_bytes()
    }
}

/// Fixed proof values for each hierarchy.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct StaticProofs {
    #[derivative(Debug = "ignore")]
    owner: Zeroizing<Vec<u8>>,
    #[derivative(Debug = "ignore")]
    endorsement: Zeroizing<Vec<u8>>,
    #[derivative(Debug = "ignore")]
    platform: Zeroizing<Vec<u8>>,
    #[derivative(Debug = "ignore")]
    null: Zeroizing<Vec<u8>>,
}

impl StaticProofs {
    pub fn new(owner: Vec<u8>, endorsement: Vec<u8>, platform: Vec<u8>, null: Vec<u8>) -> Self {
        StaticProofs {
            owner: Zeroizing::new(owner),
            endorsement: Zeroizing::new(endorsement),
            platform: Zeroizing::new(platform),
            null: Zeroizing::new(null),
        }
    }

    /// Fresh random proofs of `size` bytes
    pub fn generate(size: usize) -> Self {
        use crate::crypto::Crypto;
        Self::new(
            Crypto::get_random(size),
            Crypto::get_random(size),
            Crypto::get_random(size),
            Crypto::get_random(size),
        )
    }
}

impl HierarchyProofs for StaticProofs {
    fn proof(&self, hierarchy: TPM_RH) -> &[u8] {
        match hierarchy {
            TPM_RH::OWNER => &self.owner,
            TPM_RH::ENDORSEMENT => &self.endorsement,
            TPM_RH::PLATFORM | TPM_RH::PLATFORM_NV => &self.platform,
            TPM_RH::NULL | TPM_RH::LOCKOUT => &self.null,
        }
    }
}

/// Everything an assertion may consult.
#[derive(Clone, Copy)]
pub struct Platform<'a> {
    pub signatures: &'a dyn SignatureVerifier,
    pub names: &'a dyn NameResolver,
    pub nv: &'a dyn NvStore,
    pub pcrs: &'a dyn PcrProvider,
    pub clock: &'a dyn ClockProvider,
    pub proofs: &'a dyn HierarchyProofs,
}
