//! In-memory platform shared by the assertion tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;

use super::{PolicyEngine, PolicySignedParams};
use crate::auth_session::PolicySession;
use crate::config::EngineConfig;
use crate::crypto::{Crypto, RsaSsaVerifier};
use crate::error::TpmError;
use crate::providers::*;
use crate::tpm_types::*;

pub(crate) const START_TIME: u64 = 1_000;
pub(crate) const EPOCH: u64 = 7;
pub(crate) const NONCE: [u8; 16] = [0x5A; 16];

pub(crate) const SIGNER: TPM_HANDLE = TPM_HANDLE { handle: 0x80000001 };
pub(crate) const SECRET_OWNER: TPM_HANDLE = TPM_HANDLE { handle: 0x40000001 };
pub(crate) const PIN_INDEX: TPM_HANDLE = TPM_HANDLE { handle: 0x01000010 };
pub(crate) const NV_INDEX: TPM_HANDLE = TPM_HANDLE { handle: 0x01000001 };

lazy_static! {
    static ref SIGNING_KEY: RsaPrivateKey =
        RsaPrivateKey::new(&mut OsRng, 1024).expect("RSA key generation");
}

#[derive(Default)]
pub(crate) struct FakeNames {
    pins: HashSet<TPM_HANDLE>,
}

impl FakeNames {
    /// SHA256 name derived from the handle value
    pub(crate) fn name(&self, handle: &TPM_HANDLE) -> Vec<u8> {
        TPMT_HA::object_name(TPM_ALG_ID::SHA256, &handle.handle.to_be_bytes()).unwrap()
    }
}

impl NameResolver for FakeNames {
    fn name_of(&self, handle: &TPM_HANDLE) -> Result<Vec<u8>, TpmError> {
        Ok(self.name(handle))
    }

    fn hierarchy_of(&self, _handle: &TPM_HANDLE) -> TPM_RH {
        TPM_RH::OWNER
    }

    fn is_pin_index(&self, handle: &TPM_HANDLE) -> bool {
        self.pins.contains(handle)
    }
}

#[derive(Default)]
pub(crate) struct FakeNv {
    pub(crate) data: RefCell<HashMap<TPM_HANDLE, Vec<u8>>>,
    pub(crate) read_locked: RefCell<HashSet<TPM_HANDLE>>,
}

impl NvStore for FakeNv {
    fn read_access_check(&self, _auth: &TPM_HANDLE, index: &TPM_HANDLE) -> Result<(), TpmError> {
        if !self.data.borrow().contains_key(index) {
            return Err(TpmError::InvalidHandle);
        }
        if self.read_locked.borrow().contains(index) {
            return Err(TpmError::NvAccess("read locked".to_string()));
        }
        Ok(())
    }

    fn data_size(&self, index: &TPM_HANDLE) -> Result<u16, TpmError> {
        let data = self.data.borrow();
        let contents = data.get(index).ok_or(TpmError::InvalidHandle)?;
        Ok(contents.len() as u16)
    }

    fn read(&self, index: &TPM_HANDLE, offset: u16, len: u16) -> Result<Vec<u8>, TpmError> {
        let data = self.data.borrow();
        let contents = data.get(index).ok_or(TpmError::InvalidHandle)?;
        let start = offset as usize;
        contents
            .get(start..start + len as usize)
            .map(<[u8]>::to_vec)
            .ok_or(TpmError::OutOfRange("NV read"))
    }
}

#[derive(Default)]
pub(crate) struct FakePcrs {
    pub(crate) generation: Cell<u32>,
    values: RefCell<HashMap<u32, Vec<u8>>>,
}

impl FakePcrs {
    pub(crate) fn extend(&self, pcr: u32, data: &[u8]) {
        let mut values = self.values.borrow_mut();
        let current = values.entry(pcr).or_insert_with(|| vec![0; 32]);
        let mut input = current.clone();
        input.extend_from_slice(data);
        *current = Crypto::hash(TPM_ALG_ID::SHA256, &input).unwrap();
        self.generation.set(self.generation.get() + 1);
    }
}

impl PcrProvider for FakePcrs {
    fn composite_digest(
        &self,
        selection: &TPML_PCR_SELECTION,
        hash_alg: TPM_ALG_ID,
    ) -> Result<Vec<u8>, TpmError> {
        let values = self.values.borrow();
        let mut concatenated = Vec::new();
        for bank in &selection.pcr_selections {
            for (byte_index, byte) in bank.pcr_select.iter().enumerate() {
                for bit in 0..8 {
                    if byte & (1 << bit) != 0 {
                        let pcr = (byte_index * 8 + bit) as u32;
                        match values.get(&pcr) {
                            Some(value) => concatenated.extend_from_slice(value),
                            None => concatenated.extend_from_slice(&[0; 32]),
                        }
                    }
                }
            }
        }
        Crypto::hash(hash_alg, &concatenated)
    }

    fn current_generation(&self) -> u32 {
        self.generation.get()
    }
}

pub(crate) struct FakeClock {
    pub(crate) time: Cell<u64>,
    pub(crate) epoch: Cell<u64>,
    pub(crate) reset_count: Cell<u32>,
    pub(crate) available: Cell<bool>,
}

impl Default for FakeClock {
    fn default() -> Self {
        FakeClock {
            time: Cell::new(START_TIME + 250),
            epoch: Cell::new(EPOCH),
            reset_count: Cell::new(0),
            available: Cell::new(true),
        }
    }
}

impl FakeClock {
    pub(crate) fn info(&self) -> TimeInfo {
        TimeInfo {
            time: self.time.get(),
            clock: self.time.get(),
            reset_count: self.reset_count.get(),
            restart_count: 0,
            safe: true,
        }
    }
}

impl ClockProvider for FakeClock {
    fn time(&self) -> u64 {
        self.time.get()
    }

    fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    fn reset_count(&self) -> u32 {
        self.reset_count.get()
    }

    fn available(&self) -> bool {
        self.available.get()
    }

    fn marshaled_snapshot(&self) -> Vec<u8> {
        self.info().marshal()
    }
}

pub(crate) struct Fixture {
    pub(crate) verifier: RsaSsaVerifier,
    pub(crate) names: FakeNames,
    pub(crate) nv: FakeNv,
    pub(crate) pcrs: FakePcrs,
    pub(crate) clock: FakeClock,
    pub(crate) proofs: StaticProofs,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let mut verifier = RsaSsaVerifier::new();
        verifier.load(SIGNER, SIGNING_KEY.to_public_key());
        let mut names = FakeNames::default();
        names.pins.insert(PIN_INDEX);
        Fixture {
            verifier,
            names,
            nv: FakeNv::default(),
            pcrs: FakePcrs::default(),
            clock: FakeClock::default(),
            proofs: StaticProofs::generate(32),
        }
    }

    pub(crate) fn engine(&self) -> PolicyEngine<'_> {
        let platform = Platform {
            signatures: &self.verifier,
            names: &self.names,
            nv: &self.nv,
            pcrs: &self.pcrs,
            clock: &self.clock,
            proofs: &self.proofs,
        };
        PolicyEngine::new(platform, EngineConfig::default()).unwrap()
    }

    pub(crate) fn real_session(&self) -> PolicySession {
        PolicySession::new(TPM_ALG_ID::SHA256, false, NONCE.to_vec(), START_TIME, EPOCH).unwrap()
    }

    /// Sign the PolicySigned aHash for `params` with the SIGNER key
    pub(crate) fn sign(&self, params: &PolicySignedParams) -> TPMT_SIGNATURE {
        let mut message = params.nonce_tpm.clone();
        message.extend_from_slice(&params.expiration.to_be_bytes());
        message.extend_from_slice(&params.cp_hash_a);
        message.extend_from_slice(&params.policy_ref);
        self.sign_digest(&Crypto::hash(TPM_ALG_ID::SHA256, &message).unwrap())
    }

    pub(crate) fn sign_digest(&self, digest: &[u8]) -> TPMT_SIGNATURE {
        TPMT_SIGNATURE {
            sig_alg: TPMT_SIGNATURE::RSASSA,
            hash: TPM_ALG_ID::SHA256,
            sig: SIGNING_KEY.sign(Pkcs1v15Sign::new::<Sha256>(), digest).unwrap(),
        }
    }
}

/// SHA256 over the concatenation of `parts`
pub(crate) fn sha256(parts: &[&[u8]]) -> Vec<u8> {
    Crypto::hash(TPM_ALG_ID::SHA256, &parts.concat()).unwrap()
}

pub(crate) fn trial() -> PolicySession {
    PolicySession::trial(TPM_ALG_ID::SHA256).unwrap()
}
