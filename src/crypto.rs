use std::collections::HashMap;

use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use sm3::Sm3;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::TpmError;
use crate::hash_chain::HashChain;
use crate::providers::SignatureVerifier;
use crate::tpm_types::*;

pub struct Crypto;

impl Crypto {
    pub fn digest_size(alg: TPM_ALG_ID) -> usize {
        match alg {
            TPM_ALG_ID::SHA1 => 20,
            TPM_ALG_ID::SHA256 => 32,
            TPM_ALG_ID::SHA384 => 48,
            TPM_ALG_ID::SHA512 => 64,
            TPM_ALG_ID::SM3_256 => 32,
            TPM_ALG_ID::NULL => 0,
        }
    }

    // Hash a byte buffer using the specified algorithm
    pub fn hash(alg: TPM_ALG_ID, data: &[u8]) -> Result<Vec<u8>, TpmError> {
        let mut chain = HashChain::start(alg)?;
        chain.update(data);
        Ok(chain.finish())
    }

    pub fn hmac(hash_alg: TPM_ALG_ID, key: &[u8], to_hash: &[u8]) -> Result<Vec<u8>, TpmError> {
        // HMAC accepts keys of any length, new_from_slice cannot fail here
        let key_err = |_| TpmError::NotSupported("HMAC key rejected".to_string());
        match hash_alg {
            TPM_ALG_ID::SHA1 => {
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key).map_err(key_err)?;
                mac.update(to_hash);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            TPM_ALG_ID::SHA256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(key_err)?;
                mac.update(to_hash);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            TPM_ALG_ID::SHA384 => {
                let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key).map_err(key_err)?;
                mac.update(to_hash);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            TPM_ALG_ID::SHA512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key).map_err(key_err)?;
                mac.update(to_hash);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            TPM_ALG_ID::SM3_256 => {
                let mut mac = <Hmac<Sm3> as Mac>::new_from_slice(key).map_err(key_err)?;
                mac.update(to_hash);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            TPM_ALG_ID::NULL => Err(TpmError::NotSupported(format!(
                "Unsupported hash algorithm: {:?}",
                hash_alg
            ))),
        }
    }

    /// Constant-time equality for digests, tickets and nonces
    pub fn digests_equal(a: &[u8], b: &[u8]) -> bool {
        a.len() == b.len() && bool::from(a.ct_eq(b))
    }

    // Get random bytes
    pub fn get_random(num_bytes: usize) -> Vec<u8> {
        let mut result = vec![0u8; num_bytes];
        OsRng.fill_bytes(&mut result);
        result
    }
}

/// RSASSA-PKCS1-v1_5 verification for public keys loaded by handle.
#[derive(Debug, Default, Clone)]
pub struct RsaSsaVerifier {
    keys: HashMap<TPM_HANDLE, RsaPublicKey>,
}

impl RsaSsaVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `key` available for signatures attributed to `handle`
    pub fn load(&mut self, handle: TPM_HANDLE, key: RsaPublicKey) {
        self.keys.insert(handle, key);
    }
}

impl SignatureVerifier for RsaSsaVerifier {
    fn signing_hash(&self, _signer: &TPM_HANDLE, signature: &TPMT_SIGNATURE) -> TPM_ALG_ID {
        if signature.sig_alg != TPMT_SIGNATURE::RSASSA {
            return TPM_ALG_ID::NULL;
        }
        signature.hash
    }

    fn validate(
        &self,
        signer: &TPM_HANDLE,
        digest: &[u8],
        signature: &TPMT_SIGNATURE,
    ) -> Result<(), TpmError> {
        let key = self.keys.get(signer).ok_or(TpmError::InvalidHandle)?;
        let scheme = match self.signing_hash(signer, signature) {
            TPM_ALG_ID::SHA1 => Pkcs1v15Sign::new::<Sha1>(),
            TPM_ALG_ID::SHA256 => Pkcs1v15Sign::new::<Sha256>(),
            TPM_ALG_ID::SHA384 => Pkcs1v15Sign::new::<Sha384>(),
            TPM_ALG_ID::SHA512 => Pkcs1v15Sign::new::<Sha512>(),
            _ => return Err(TpmError::UnsupportedScheme),
        };
        key.verify(scheme, digest, &signature.sig).map_err(|e| {
            debug!(handle = signer.handle, error = %e, "RSASSA verification failed");
            TpmError::SignatureMismatch
        })
    }
}
