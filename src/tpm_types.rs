/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! TPM 2.0 constants and structures used by policy sessions

use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::tpm_buffer::TpmBuffer;
use crate::tpm_structure::{tpm_enum, TpmEnum, TpmMarshaller};

tpm_enum! {
    /// Hash algorithm identifiers usable for policy sessions and tickets
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum TPM_ALG_ID : u16 {
        SHA1 = 0x0004,
        SHA256 = 0x000B,
        SHA384 = 0x000C,
        SHA512 = 0x000D,
        NULL = 0x0010,
        SM3_256 = 0x0012,
    }
}

impl Default for TPM_ALG_ID {
    fn default() -> Self {
        TPM_ALG_ID::NULL
    }
}

tpm_enum! {
    /// Command codes
    #[allow(clippy::upper_case_acronyms)]
    pub enum TPM_CC : u32 {
        NV_UndefineSpaceSpecial = 0x0000011f,
        EvictControl = 0x00000120,
        HierarchyControl = 0x00000121,
        NV_UndefineSpace = 0x00000122,
        ChangeEPS = 0x00000124,
        ChangePPS = 0x00000125,
        Clear = 0x00000126,
        ClearControl = 0x00000127,
        ClockSet = 0x00000128,
        HierarchyChangeAuth = 0x00000129,
        NV_DefineSpace = 0x0000012a,
        PCR_Allocate = 0x0000012b,
        PCR_SetAuthPolicy = 0x0000012c,
        PP_Commands = 0x0000012d,
        SetPrimaryPolicy = 0x0000012e,
        FieldUpgradeStart = 0x0000012f,
        ClockRateAdjust = 0x00000130,
        CreatePrimary = 0x00000131,
        NV_GlobalWriteLock = 0x00000132,
        GetCommandAuditDigest = 0x00000133,
        NV_Increment = 0x00000134,
        NV_SetBits = 0x00000135,
        NV_Extend = 0x00000136,
        NV_Write = 0x00000137,
        NV_WriteLock = 0x00000138,
        DictionaryAttackLockReset = 0x00000139,
        DictionaryAttackParameters = 0x0000013a,
        NV_ChangeAuth = 0x0000013b,
        PCR_Event = 0x0000013c,
        PCR_Reset = 0x0000013d,
        SequenceComplete = 0x0000013e,
        SetAlgorithmSet = 0x0000013f,
        SetCommandCodeAuditStatus = 0x00000140,
        FieldUpgradeData = 0x00000141,
        IncrementalSelfTest = 0x00000142,
        SelfTest = 0x00000143,
        Startup = 0x00000144,
        Shutdown = 0x00000145,
        StirRandom = 0x00000146,
        ActivateCredential = 0x00000147,
        Certify = 0x00000148,
        PolicyNV = 0x00000149,
        CertifyCreation = 0x0000014a,
        Duplicate = 0x0000014b,
        GetTime = 0x0000014c,
        GetSessionAuditDigest = 0x0000014d,
        NV_Read = 0x0000014e,
        NV_ReadLock = 0x0000014f,
        ObjectChangeAuth = 0x00000150,
        PolicySecret = 0x00000151,
        Rewrap = 0x00000152,
        Create = 0x00000153,
        ECDH_ZGen = 0x00000154,
        HMAC = 0x00000155,
        Import = 0x00000156,
        Load = 0x00000157,
        Quote = 0x00000158,
        RSA_Decrypt = 0x00000159,
        HMAC_Start = 0x0000015b,
        SequenceUpdate = 0x0000015c,
        Sign = 0x0000015d,
        Unseal = 0x0000015e,
        PolicySigned = 0x00000160,
        ContextLoad = 0x00000161,
        ContextSave = 0x00000162,
        ECDH_KeyGen = 0x00000163,
        EncryptDecrypt = 0x00000164,
        FlushContext = 0x00000165,
        LoadExternal = 0x00000167,
        MakeCredential = 0x00000168,
        NV_ReadPublic = 0x00000169,
        PolicyAuthorize = 0x0000016a,
        PolicyAuthValue = 0x0000016b,
        PolicyCommandCode = 0x0000016c,
        PolicyCounterTimer = 0x0000016d,
        PolicyCpHash = 0x0000016e,
        PolicyLocality = 0x0000016f,
        PolicyNameHash = 0x00000170,
        PolicyOR = 0x00000171,
        PolicyTicket = 0x00000172,
        ReadPublic = 0x00000173,
        RSA_Encrypt = 0x00000174,
        StartAuthSession = 0x00000176,
        VerifySignature = 0x00000177,
        ECC_Parameters = 0x00000178,
        FirmwareRead = 0x00000179,
        GetCapability = 0x0000017a,
        GetRandom = 0x0000017b,
        GetTestResult = 0x0000017c,
        Hash = 0x0000017d,
        PCR_Read = 0x0000017e,
        PolicyPCR = 0x0000017f,
        PolicyRestart = 0x00000180,
        ReadClock = 0x00000181,
        PCR_Extend = 0x00000182,
        PCR_SetAuthValue = 0x00000183,
        NV_Certify = 0x00000184,
        EventSequenceComplete = 0x00000185,
        HashSequenceStart = 0x00000186,
        PolicyPhysicalPresence = 0x00000187,
        PolicyDuplicationSelect = 0x00000188,
        PolicyGetDigest = 0x00000189,
        TestParms = 0x0000018a,
        Commit = 0x0000018b,
        PolicyPassword = 0x0000018c,
        ZGen_2Phase = 0x0000018d,
        EC_Ephemeral = 0x0000018e,
        PolicyNvWritten = 0x0000018f,
        PolicyTemplate = 0x00000190,
        CreateLoaded = 0x00000191,
        PolicyAuthorizeNV = 0x00000192,
        EncryptDecrypt2 = 0x00000193,
        AC_GetCapability = 0x00000194,
        AC_Send = 0x00000195,
        Policy_AC_SendSelect = 0x00000196,
        CertifyX509 = 0x00000197,
        ACT_SetTimeout = 0x00000198,
    }
}

lazy_static! {
    static ref COMMAND_LOOKUP: HashMap<u32, TPM_CC> =
        TPM_CC::ALL.iter().map(|cc| (cc.get_value(), *cc)).collect();
}

impl TPM_CC {
    /// Resolve a raw command code to an implemented command
    pub fn lookup(code: u32) -> Option<TPM_CC> {
        COMMAND_LOOKUP.get(&code).copied()
    }
}

tpm_enum! {
    /// Comparison operators for PolicyNV and PolicyCounterTimer
    pub enum TPM_EO : u16 {
        EQ = 0x0000,
        NEQ = 0x0001,
        SIGNED_GT = 0x0002,
        UNSIGNED_GT = 0x0003,
        SIGNED_LT = 0x0004,
        UNSIGNED_LT = 0x0005,
        SIGNED_GE = 0x0006,
        UNSIGNED_GE = 0x0007,
        SIGNED_LE = 0x0008,
        UNSIGNED_LE = 0x0009,
        BITSET = 0x000A,
        BITCLEAR = 0x000B,
    }
}

tpm_enum! {
    /// Structure tags for tickets
    pub enum TPM_ST : u16 {
        VERIFIED = 0x8022,
        AUTH_SECRET = 0x8023,
        AUTH_SIGNED = 0x8025,
    }
}

tpm_enum! {
    /// Permanent hierarchy handles
    pub enum TPM_RH : u32 {
        OWNER = 0x40000001,
        NULL = 0x40000007,
        LOCKOUT = 0x4000000A,
        ENDORSEMENT = 0x4000000B,
        PLATFORM = 0x4000000C,
        PLATFORM_NV = 0x4000000D,
    }
}

/// Reference to a TPM entity (key, NV index, hierarchy)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TPM_HANDLE {
    pub handle: u32,
}

impl TPM_HANDLE {
    pub fn new(handle: u32) -> Self {
        TPM_HANDLE { handle }
    }
}

impl From<TPM_RH> for TPM_HANDLE {
    fn from(rh: TPM_RH) -> Self {
        TPM_HANDLE::new(rh.get_value())
    }
}

/// Locality restriction in its canonical single-byte form.
///
/// Values below 32 are a bit mask over localities 0..=4; values of 32 and
/// above name a single extended locality.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TPMA_LOCALITY(pub u8);

impl TPMA_LOCALITY {
    pub const LOC_ZERO: TPMA_LOCALITY = TPMA_LOCALITY(1 << 0);
    pub const LOC_ONE: TPMA_LOCALITY = TPMA_LOCALITY(1 << 1);
    pub const LOC_TWO: TPMA_LOCALITY = TPMA_LOCALITY(1 << 2);
    pub const LOC_THREE: TPMA_LOCALITY = TPMA_LOCALITY(1 << 3);
    pub const LOC_FOUR: TPMA_LOCALITY = TPMA_LOCALITY(1 << 4);

    /// Every normal locality
    pub const ALL_NORMAL: u8 = 0x1F;

    pub fn get_value(&self) -> u8 {
        self.0
    }

    pub fn is_extended(&self) -> bool {
        self.0 >= 32
    }
}

impl std::ops::BitOr for TPMA_LOCALITY {
    type Output = TPMA_LOCALITY;

    fn bitor(self, rhs: TPMA_LOCALITY) -> TPMA_LOCALITY {
        TPMA_LOCALITY(self.0 | rhs.0)
    }
}

/// Selection of PCRs in one bank
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TPMS_PCR_SELECTION {
    pub hash: TPM_ALG_ID,
    pub pcr_select: Vec<u8>,
}

impl TPMS_PCR_SELECTION {
    /// Select the given PCR indices from a 24-PCR bank
    pub fn new(hash: TPM_ALG_ID, pcrs: &[u32]) -> Self {
        let mut pcr_select = vec![0u8; 3];
        for &pcr in pcrs {
            let byte = (pcr / 8) as usize;
            if byte >= pcr_select.len() {
                pcr_select.resize(byte + 1, 0);
            }
            pcr_select[byte] |= 1 << (pcr % 8);
        }
        TPMS_PCR_SELECTION { hash, pcr_select }
    }
}

impl TpmMarshaller for TPMS_PCR_SELECTION {
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError> {
        let size = u8::try_from(self.pcr_select.len())
            .map_err(|_| TpmError::OutOfRange("sizeofSelect"))?;
        buffer.write_u16(self.hash.get_value());
        buffer.write_u8(size);
        buffer.write_bytes(&self.pcr_select);
        Ok(())
    }

    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError> {
        let hash = TPM_ALG_ID::try_from_value(buffer.read_u16()?)?;
        let size = buffer.read_u8()?;
        let pcr_select = buffer.read_bytes(size as usize)?;
        Ok(TPMS_PCR_SELECTION { hash, pcr_select })
    }
}

/// List of PCR selections, one per bank
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TPML_PCR_SELECTION {
    pub pcr_selections: Vec<TPMS_PCR_SELECTION>,
}

impl TpmMarshaller for TPML_PCR_SELECTION {
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError> {
        buffer.write_u32(self.pcr_selections.len() as u32);
        for sel in &self.pcr_selections {
            sel.to_tpm(buffer)?;
        }
        Ok(())
    }

    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError> {
        let count = buffer.read_u32()?;
        let mut pcr_selections = Vec::new();
        for _ in 0..count {
            pcr_selections.push(TPMS_PCR_SELECTION::from_tpm(buffer)?);
        }
        Ok(TPML_PCR_SELECTION { pcr_selections })
    }
}

/// A signature as presented to PolicySigned / PolicyAuthorize verification
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TPMT_SIGNATURE {
    /// Signature scheme, e.g. RSASSA = 0x0014
    pub sig_alg: u16,
    /// Hash used to produce the signed digest
    pub hash: TPM_ALG_ID,
    pub sig: Vec<u8>,
}

impl TPMT_SIGNATURE {
    pub const RSASSA: u16 = 0x0014;
}

/// Tagged hash value, as stored in an NV index for PolicyAuthorizeNV
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TPMT_HA {
    pub hash_alg: TPM_ALG_ID,
    pub digest: Vec<u8>,
}

impl TPMT_HA {
    /// Largest marshaled size (algorithm + largest digest)
    pub const MAX_SIZE: usize = 2 + 64;
}

impl TpmMarshaller for TPMT_HA {
    fn to_tpm(&self, buffer: &mut TpmBuffer) -> Result<(), TpmError> {
        buffer.write_u16(self.hash_alg.get_value());
        buffer.write_bytes(&self.digest);
        Ok(())
    }

    fn from_tpm(buffer: &mut TpmBuffer) -> Result<Self, TpmError> {
        let hash_alg = TPM_ALG_ID::try_from_value(buffer.read_u16()?)?;
        let size = Crypto::digest_size(hash_alg);
        if size == 0 {
            return Err(TpmError::NotSupported(format!(
                "Unsupported hash algorithm: {:?}",
                hash_alg
            )));
        }
        let digest = buffer.read_bytes(size)?;
        Ok(TPMT_HA { hash_alg, digest })
    }
}
