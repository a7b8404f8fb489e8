use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::tpm_structure::{TpmEnum, TpmMarshaller};
use crate::tpm_types::*;

impl TPMT_HA {
    /// Hash `data` with `hash_alg`
    pub fn digest_of(hash_alg: TPM_ALG_ID, data: &[u8]) -> Result<Self, TpmError> {
        Ok(TPMT_HA {
            hash_alg,
            digest: Crypto::hash(hash_alg, data)?,
        })
    }

    /// Name of an object with the marshaled public area `public_area`:
    /// `nameAlg || H_nameAlg(public_area)`
    pub fn object_name(name_alg: TPM_ALG_ID, public_area: &[u8]) -> Result<Vec<u8>, TpmError> {
        Self::digest_of(name_alg, public_area)?.to_bytes()
    }

    /// Parse an object name, requiring the digest to be exactly the size of
    /// its algorithm.
    pub fn from_name(name: &[u8]) -> Result<Self, TpmError> {
        if name.len() < 2 {
            return Err(TpmError::SizeMismatch {
                what: "name",
                expected: 2,
                actual: name.len(),
            });
        }
        let hash_alg = TPM_ALG_ID::try_from_value(u16::from_be_bytes([name[0], name[1]]))?;
        let size = Crypto::digest_size(hash_alg);
        if size == 0 {
            return Err(TpmError::NotSupported(format!(
                "Unsupported name algorithm: {:?}",
                hash_alg
            )));
        }
        if name.len() - 2 != size {
            return Err(TpmError::SizeMismatch {
                what: "name",
                expected: size + 2,
                actual: name.len(),
            });
        }
        Ok(TPMT_HA {
            hash_alg,
            digest: name[2..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name_round_trip() {
        let name = TPMT_HA::object_name(TPM_ALG_ID::SHA256, b"public area").unwrap();
        assert_eq!(name.len(), 34);
        assert_eq!(&name[..2], &[0x00, 0x0B]);

        let parsed = TPMT_HA::from_name(&name).unwrap();
        assert_eq!(parsed.hash_alg, TPM_ALG_ID::SHA256);
        assert_eq!(parsed, TPMT_HA::digest_of(TPM_ALG_ID::SHA256, b"public area").unwrap());
    }

    #[test]
    fn test_from_name_rejects_malformed() {
        assert!(matches!(
            TPMT_HA::from_name(&[0x00]),
            Err(TpmError::SizeMismatch { what: "name", .. })
        ));
        assert!(matches!(
            TPMT_HA::from_name(&[0x00, 0x04, 0x01]),
            Err(TpmError::SizeMismatch { expected: 22, actual: 3, .. })
        ));
        assert!(matches!(
            TPMT_HA::from_name(&[0x00, 0x10]),
            Err(TpmError::NotSupported(_))
        ));
        assert!(matches!(
            TPMT_HA::from_name(&[0x12, 0x34, 0x00]),
            Err(TpmError::InvalidEnumValue { .. })
        ));
    }
}
