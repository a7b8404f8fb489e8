//! Arena of open policy sessions addressed by index and generation.

use tracing::debug;

use crate::auth_session::PolicySession;
use crate::config::{ConfigError, EngineConfig};
use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::providers::ClockProvider;
use crate::tpm_types::TPM_ALG_ID;

/// Size of the nonce generated for each session
pub const SESSION_NONCE_SIZE: usize = 16;

/// Stable reference to a session slot.
///
/// The generation changes every time the slot is reused, so a handle to a
/// flushed session never resolves to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    session: Option<PolicySession>,
}

#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<Slot>,
    capacity: usize,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        SessionTable {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Table sized by `config.max_sessions`
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.max_sessions))
    }

    /// Open a session with a fresh nonce, started at the current time.
    pub fn open(
        &mut self,
        hash_alg: TPM_ALG_ID,
        is_trial: bool,
        clock: &dyn ClockProvider,
    ) -> Result<SessionHandle, TpmError> {
        let session = PolicySession::new(
            hash_alg,
            is_trial,
            Crypto::get_random(SESSION_NONCE_SIZE),
            clock.time(),
            clock.epoch(),
        )?;
        self.insert(session)
    }

    /// Place an already constructed session in a free slot
    pub fn insert(&mut self, session: PolicySession) -> Result<SessionHandle, TpmError> {
        let index = match self.slots.iter().position(|slot| slot.session.is_none()) {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
            None => return Err(TpmError::SessionTableFull),
        };
        let slot = &mut self.slots[index];
        slot.session = Some(session);
        let handle = SessionHandle {
            index: index as u32,
            generation: slot.generation,
        };
        debug!(index, generation = slot.generation, "policy session opened");
        Ok(handle)
    }

    fn slot(&self, handle: SessionHandle) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    pub fn get(&self, handle: SessionHandle) -> Result<&PolicySession, TpmError> {
        self.slot(handle)
            .and_then(|slot| slot.session.as_ref())
            .ok_or(TpmError::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Result<&mut PolicySession, TpmError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.session.as_mut())
            .ok_or(TpmError::InvalidHandle)
    }

    /// Close a session and retire its handle
    pub fn flush(&mut self, handle: SessionHandle) -> Result<PolicySession, TpmError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(TpmError::InvalidHandle)?;
        let session = slot.session.take().ok_or(TpmError::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        debug!(index = handle.index, "policy session flushed");
        Ok(session)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.session.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
