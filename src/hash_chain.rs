//! Incremental hash context used for every policy digest computation.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use sm3::Sm3;

use crate::error::TpmError;
use crate::tpm_types::TPM_ALG_ID;

#[derive(Clone)]
enum HashState {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Sm3(Sm3),
}

/// A started hash computation.
///
/// Integers are fed in big-endian order, byte strings are fed without any
/// size prefix, matching how policy digests are defined.
#[derive(Clone)]
pub struct HashChain {
    state: HashState,
}

impl HashChain {
    /// Start a hash context for `alg`.
    pub fn start(alg: TPM_ALG_ID) -> Result<Self, TpmError> {
        let state = match alg {
            TPM_ALG_ID::SHA1 => HashState::Sha1(Sha1::new()),
            TPM_ALG_ID::SHA256 => HashState::Sha256(Sha256::new()),
            TPM_ALG_ID::SHA384 => HashState::Sha384(Sha384::new()),
            TPM_ALG_ID::SHA512 => HashState::Sha512(Sha512::new()),
            TPM_ALG_ID::SM3_256 => HashState::Sm3(Sm3::new()),
            TPM_ALG_ID::NULL => {
                return Err(TpmError::NotSupported(format!(
                    "Unsupported hash algorithm: {:?}",
                    alg
                )))
            }
        };
        Ok(HashChain { state })
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        match &mut self.state {
            HashState::Sha1(h) => Digest::update(h, data),
            HashState::Sha256(h) => Digest::update(h, data),
            HashState::Sha384(h) => Digest::update(h, data),
            HashState::Sha512(h) => Digest::update(h, data),
            HashState::Sm3(h) => Digest::update(h, data),
        }
        self
    }

    pub fn update_u16(&mut self, value: u16) -> &mut Self {
        self.update(&value.to_be_bytes())
    }

    pub fn update_u32(&mut self, value: u32) -> &mut Self {
        self.update(&value.to_be_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        match self.state {
            HashState::Sha1(h) => h.finalize().to_vec(),
            HashState::Sha256(h) => h.finalize().to_vec(),
            HashState::Sha384(h) => h.finalize().to_vec(),
            HashState::Sha512(h) => h.finalize().to_vec(),
            HashState::Sm3(h) => h.finalize().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Crypto;

    #[test]
    fn test_sha256_abc() {
        let mut chain = HashChain::start(TPM_ALG_ID::SHA256).unwrap();
        chain.update(b"a").update(b"bc");
        assert_eq!(
            hex::encode(chain.finish()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sizes() {
        for (alg, size) in [
            (TPM_ALG_ID::SHA1, 20),
            (TPM_ALG_ID::SHA256, 32),
            (TPM_ALG_ID::SHA384, 48),
            (TPM_ALG_ID::SHA512, 64),
            (TPM_ALG_ID::SM3_256, 32),
        ] {
            let chain = HashChain::start(alg).unwrap();
            assert_eq!(chain.finish().len(), size);
            assert_eq!(Crypto::digest_size(alg), size);
        }
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut a = HashChain::start(TPM_ALG_ID::SHA1).unwrap();
        a.update_u32(0x0000016C);
        let mut b = HashChain::start(TPM_ALG_ID::SHA1).unwrap();
        b.update(&[0x00, 0x00, 0x01, 0x6C]);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_null_alg_rejected() {
        assert!(HashChain::start(TPM_ALG_ID::NULL).is_err());
    }
}
