//! End-to-end policy flows against an in-memory platform.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use lazy_static::lazy_static;
use proptest::prelude::*;
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;

use tss_policy::*;

const AUTHORITY: TPM_HANDLE = TPM_HANDLE { handle: 0x81000010 };
const COUNTER: TPM_HANDLE = TPM_HANDLE { handle: 0x01500020 };

lazy_static! {
    static ref AUTHORITY_KEY: RsaPrivateKey = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
}

struct Names;

impl NameResolver for Names {
    fn name_of(&self, handle: &TPM_HANDLE) -> Result<Vec<u8>, TpmError> {
        TPMT_HA::object_name(TPM_ALG_ID::SHA256, &handle.handle.to_be_bytes())
    }

    fn hierarchy_of(&self, _handle: &TPM_HANDLE) -> TPM_RH {
        TPM_RH::ENDORSEMENT
    }
}

#[derive(Default)]
struct Nv {
    indices: RefCell<HashMap<TPM_HANDLE, Vec<u8>>>,
}

impl NvStore for Nv {
    fn read_access_check(&self, _auth: &TPM_HANDLE, index: &TPM_HANDLE) -> Result<(), TpmError> {
        if self.indices.borrow().contains_key(index) {
            Ok(())
        } else {
            Err(TpmError::NvAccess(format!("index 0x{:08X} not defined", index.handle)))
        }
    }

    fn data_size(&self, index: &TPM_HANDLE) -> Result<u16, TpmError> {
        let indices = self.indices.borrow();
        let data = indices.get(index).ok_or(TpmError::InvalidHandle)?;
        Ok(data.len() as u16)
    }

    fn read(&self, index: &TPM_HANDLE, offset: u16, len: u16) -> Result<Vec<u8>, TpmError> {
        let indices = self.indices.borrow();
        let data = indices.get(index).ok_or(TpmError::InvalidHandle)?;
        let start = offset as usize;
        data.get(start..start + len as usize)
            .map(<[u8]>::to_vec)
            .ok_or(TpmError::OutOfRange("read"))
    }
}

#[derive(Default)]
struct Pcrs {
    generation: Cell<u32>,
}

impl PcrProvider for Pcrs {
    fn composite_digest(
        &self,
        selection: &TPML_PCR_SELECTION,
        hash_alg: TPM_ALG_ID,
    ) -> Result<Vec<u8>, TpmError> {
        let mut input = selection.to_bytes()?;
        input.extend_from_slice(&self.generation.get().to_be_bytes());
        Crypto::hash(hash_alg, &input)
    }

    fn current_generation(&self) -> u32 {
        self.generation.get()
    }
}

struct Clock {
    time: Cell<u64>,
}

impl ClockProvider for Clock {
    fn time(&self) -> u64 {
        self.time.get()
    }

    fn epoch(&self) -> u64 {
        3
    }

    fn reset_count(&self) -> u32 {
        0
    }

    fn available(&self) -> bool {
        true
    }

    fn marshaled_snapshot(&self) -> Vec<u8> {
        TimeInfo {
            time: self.time.get(),
            clock: self.time.get(),
            ..TimeInfo::default()
        }
        .marshal()
    }
}

struct World {
    verifier: RsaSsaVerifier,
    names: Names,
    nv: Nv,
    pcrs: Pcrs,
    clock: Clock,
    proofs: StaticProofs,
}

impl World {
    fn new() -> Self {
        let mut verifier = RsaSsaVerifier::new();
        verifier.load(AUTHORITY, AUTHORITY_KEY.to_public_key());
        World {
            verifier,
            names: Names,
            nv: Nv::default(),
            pcrs: Pcrs::default(),
            clock: Clock {
                time: Cell::new(50_000),
            },
            proofs: StaticProofs::generate(32),
        }
    }

    fn platform(&self) -> Platform<'_> {
        Platform {
            signatures: &self.verifier,
            names: &self.names,
            nv: &self.nv,
            pcrs: &self.pcrs,
            clock: &self.clock,
            proofs: &self.proofs,
        }
    }

    fn engine(&self) -> PolicyEngine<'_> {
        PolicyEngine::new(self.platform(), EngineConfig::default()).unwrap()
    }

    fn sign(&self, params: &PolicySignedParams) -> TPMT_SIGNATURE {
        let mut message = params.nonce_tpm.clone();
        message.extend_from_slice(&params.expiration.to_be_bytes());
        message.extend_from_slice(&params.cp_hash_a);
        message.extend_from_slice(&params.policy_ref);
        let digest = Crypto::hash(TPM_ALG_ID::SHA256, &message).unwrap();
        TPMT_SIGNATURE {
            sig_alg: TPMT_SIGNATURE::RSASSA,
            hash: TPM_ALG_ID::SHA256,
            sig: AUTHORITY_KEY.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap(),
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pcr_selection() -> TPML_PCR_SELECTION {
    TPML_PCR_SELECTION {
        pcr_selections: vec![TPMS_PCR_SELECTION::new(TPM_ALG_ID::SHA256, &[0, 1, 2, 3])],
    }
}

/// Digest of "signed by AUTHORITY, for Unseal, bound to PCRs 0-3"
fn build_policy(engine: &PolicyEngine<'_>, world: &World, session: &mut PolicySession) {
    let mut signed = PolicySignedParams {
        auth_object: AUTHORITY,
        policy_ref: b"unseal-only".to_vec(),
        ..Default::default()
    };
    if !session.is_trial() {
        signed.nonce_tpm = session.nonce_tpm().to_vec();
        signed.auth = world.sign(&signed);
    }
    engine.policy_signed(session, &signed).unwrap();
    engine
        .policy_command_code(session, TPM_CC::Unseal.get_value())
        .unwrap();
    engine.policy_pcr(session, &[], &pcr_selection()).unwrap();
}

#[test]
fn trial_and_real_sessions_agree() {
    init_tracing();
    let world = World::new();
    let engine = world.engine();
    let mut table = SessionTable::from_config(&EngineConfig::default()).unwrap();

    let trial = table.open(TPM_ALG_ID::SHA256, true, &world.clock).unwrap();
    let real = table.open(TPM_ALG_ID::SHA256, false, &world.clock).unwrap();
    assert_ne!(
        table.get(trial).unwrap().nonce_tpm(),
        table.get(real).unwrap().nonce_tpm()
    );

    build_policy(&engine, &world, table.get_mut(trial).unwrap());
    build_policy(&engine, &world, table.get_mut(real).unwrap());

    let expected = engine.policy_get_digest(table.get(trial).unwrap());
    assert_eq!(engine.policy_get_digest(table.get(real).unwrap()), expected);
    assert_eq!(table.get(real).unwrap().bound_command(), Some(TPM_CC::Unseal));
    assert_eq!(table.get(real).unwrap().pcr_generation(), Some(0));
    assert_eq!(table.get(trial).unwrap().pcr_generation(), None);

    table.flush(trial).unwrap();
    table.flush(real).unwrap();
    assert!(table.is_empty());
}

#[test]
fn or_of_alternatives_accepts_either_branch() {
    init_tracing();
    let world = World::new();
    let engine = world.engine();

    let mut unseal = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
    engine
        .policy_command_code(&mut unseal, TPM_CC::Unseal.get_value())
        .unwrap();
    let mut physical = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
    engine.policy_physical_presence(&mut physical).unwrap();
    let mut password = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
    engine.policy_password(&mut password).unwrap();

    let branches = vec![
        unseal.policy_digest().to_vec(),
        physical.policy_digest().to_vec(),
        password.policy_digest().to_vec(),
    ];
    let mut combined = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
    engine.policy_or(&mut combined, &branches).unwrap();

    let mut expected = vec![0u8; 32];
    expected.extend_from_slice(&TPM_CC::PolicyOR.get_value().to_be_bytes());
    for branch in &branches {
        expected.extend_from_slice(branch);
    }
    assert_eq!(
        combined.policy_digest(),
        Crypto::hash(TPM_ALG_ID::SHA256, &expected).unwrap()
    );

    let mut session = PolicySession::new(TPM_ALG_ID::SHA256, false, vec![9; 16], 0, 3).unwrap();
    engine.policy_physical_presence(&mut session).unwrap();
    engine.policy_or(&mut session, &branches).unwrap();
    assert_eq!(session.policy_digest(), combined.policy_digest());
    assert!(session.flags().physical_presence_required);

    let mut wrong = PolicySession::new(TPM_ALG_ID::SHA256, false, vec![9; 16], 0, 3).unwrap();
    engine.policy_nv_written(&mut wrong, true).unwrap();
    let before = wrong.policy_digest().to_vec();
    let err = engine.policy_or(&mut wrong, &branches).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyMembership);
    assert_eq!(wrong.policy_digest(), before);
}

#[test]
fn secret_ticket_replays_into_fresh_session() {
    init_tracing();
    let world = World::new();
    let engine = world.engine();
    let mut table = SessionTable::new(4);

    let first = table.open(TPM_ALG_ID::SHA256, false, &world.clock).unwrap();
    let nonce = table.get(first).unwrap().nonce_tpm().to_vec();
    let response = engine
        .policy_secret(
            table.get_mut(first).unwrap(),
            &PolicySecretParams {
                auth_handle: TPM_HANDLE::from(TPM_RH::OWNER),
                nonce_tpm: nonce,
                expiration: -30,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(response.policy_ticket.hierarchy, TPM_RH::ENDORSEMENT);
    let timeout = PackedTimeout::from_bytes(&response.timeout).unwrap();
    assert!(!timeout.expires_on_reset);

    let second = table.open(TPM_ALG_ID::SHA256, false, &world.clock).unwrap();
    let replay = PolicyTicketParams {
        timeout: response.timeout.clone(),
        cp_hash_a: Vec::new(),
        policy_ref: Vec::new(),
        auth_name: world.names.name_of(&TPM_HANDLE::from(TPM_RH::OWNER)).unwrap(),
        ticket: response.policy_ticket.clone(),
    };
    engine
        .policy_ticket(table.get_mut(second).unwrap(), &replay)
        .unwrap();
    assert_eq!(
        table.get(first).unwrap().policy_digest(),
        table.get(second).unwrap().policy_digest()
    );

    // past the ticket's lifetime
    world.clock.time.set(timeout.timeout + 1);
    let third = table.open(TPM_ALG_ID::SHA256, false, &world.clock).unwrap();
    let err = engine
        .policy_ticket(table.get_mut(third).unwrap(), &replay)
        .unwrap_err();
    assert!(matches!(err, TpmError::Expired));
    assert_eq!(err.kind(), ErrorKind::Freshness);
}

#[test]
fn authorize_nv_follows_index_contents() {
    init_tracing();
    let world = World::new();
    let engine = world.engine();

    let mut approved = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
    engine
        .policy_command_code(&mut approved, TPM_CC::NV_Increment.get_value())
        .unwrap();
    let stored = TPMT_HA {
        hash_alg: TPM_ALG_ID::SHA256,
        digest: approved.policy_digest().to_vec(),
    };
    world
        .nv
        .indices
        .borrow_mut()
        .insert(COUNTER, stored.to_bytes().unwrap());

    let params = PolicyAuthorizeNvParams {
        auth_handle: COUNTER,
        nv_index: COUNTER,
    };
    let mut session = PolicySession::new(TPM_ALG_ID::SHA256, false, vec![1; 16], 0, 3).unwrap();
    engine
        .policy_command_code(&mut session, TPM_CC::NV_Increment.get_value())
        .unwrap();
    engine.policy_authorize_nv(&mut session, &params).unwrap();

    let mut offline = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
    engine.policy_authorize_nv(&mut offline, &params).unwrap();
    assert_eq!(session.policy_digest(), offline.policy_digest());
}

#[test]
fn counter_timer_against_clock() {
    let world = World::new();
    let engine = world.engine();
    let mut session = PolicySession::new(TPM_ALG_ID::SHA256, false, vec![1; 16], 0, 3).unwrap();
    let not_before = PolicyCounterTimerParams {
        operand_b: 40_000u64.to_be_bytes().to_vec(),
        offset: 0,
        operation: TPM_EO::UNSIGNED_GE,
    };
    engine.policy_counter_timer(&mut session, &not_before).unwrap();

    let not_after = PolicyCounterTimerParams {
        operand_b: 45_000u64.to_be_bytes().to_vec(),
        offset: 0,
        operation: TPM_EO::UNSIGNED_LE,
    };
    let err = engine
        .policy_counter_timer(&mut session, &not_after)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalStateMismatch);
}

#[test]
fn config_drives_or_limit() {
    let world = World::new();
    let config = EngineConfig::from_toml("max_or_branches = 2").unwrap();
    let engine = PolicyEngine::new(world.platform(), config).unwrap();
    let mut session = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
    let err = engine
        .policy_or(&mut session, &[vec![1; 32], vec![2; 32], vec![3; 32]])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RangeOrSize);
    engine
        .policy_or(&mut session, &[vec![1; 32], vec![2; 32]])
        .unwrap();
}

#[test]
fn engine_rejects_invalid_config() {
    let world = World::new();
    let config = EngineConfig {
        max_or_branches: 1,
        ..EngineConfig::default()
    };
    assert!(matches!(
        PolicyEngine::new(world.platform(), config),
        Err(ConfigError::Validation(_))
    ));
}

#[derive(Debug, Clone)]
enum Assertion {
    AuthValue,
    Password,
    PhysicalPresence,
    CommandCode(TPM_CC),
    Locality(u8),
    NvWritten(bool),
    CpHash(u8),
    NameHash(u8),
}

fn assertion() -> impl Strategy<Value = Assertion> {
    prop_oneof![
        Just(Assertion::AuthValue),
        Just(Assertion::Password),
        Just(Assertion::PhysicalPresence),
        prop::sample::select(vec![TPM_CC::Unseal, TPM_CC::Sign, TPM_CC::NV_Read])
            .prop_map(Assertion::CommandCode),
        (0u8..=0x1F).prop_map(Assertion::Locality),
        any::<bool>().prop_map(Assertion::NvWritten),
        (0u8..3).prop_map(Assertion::CpHash),
        (0u8..3).prop_map(Assertion::NameHash),
    ]
}

fn apply(
    engine: &PolicyEngine<'_>,
    session: &mut PolicySession,
    assertion: &Assertion,
) -> Result<(), TpmError> {
    match assertion {
        Assertion::AuthValue => engine.policy_auth_value(session),
        Assertion::Password => engine.policy_password(session),
        Assertion::PhysicalPresence => engine.policy_physical_presence(session),
        Assertion::CommandCode(code) => engine.policy_command_code(session, code.get_value()),
        Assertion::Locality(locality) => {
            engine.policy_locality(session, TPMA_LOCALITY(*locality))
        }
        Assertion::NvWritten(set) => engine.policy_nv_written(session, *set),
        Assertion::CpHash(fill) => engine.policy_cp_hash(session, &[*fill; 32]),
        Assertion::NameHash(fill) => engine.policy_name_hash(session, &[*fill; 32]),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn trial_digest_is_deterministic(assertions in prop::collection::vec(assertion(), 0..12)) {
        let world = World::new();
        let engine = world.engine();
        let mut first = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
        let mut second = PolicySession::trial(TPM_ALG_ID::SHA256).unwrap();
        let mut real = PolicySession::new(TPM_ALG_ID::SHA256, false, vec![4; 16], 0, 3).unwrap();

        for assertion in &assertions {
            let before = real.policy_digest().to_vec();
            let a = apply(&engine, &mut first, assertion);
            let b = apply(&engine, &mut second, assertion);
            let r = apply(&engine, &mut real, assertion);
            prop_assert_eq!(a.is_ok(), b.is_ok());
            prop_assert_eq!(a.is_ok(), r.is_ok());
            if r.is_err() {
                prop_assert_eq!(real.policy_digest(), &before[..]);
            }
            prop_assert_eq!(first.policy_digest(), second.policy_digest());
            prop_assert_eq!(first.policy_digest(), real.policy_digest());
        }
    }
}
