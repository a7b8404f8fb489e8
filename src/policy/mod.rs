/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! Policy assertions over an open [`PolicySession`].
//!
//! Every assertion has the same shape: validate the request, then extend the
//! session digest. Trial sessions skip only the checks against external state
//! and signatures, so a trial run produces exactly the digest a real run
//! would. A failed assertion leaves the session untouched.

mod compare;
mod compose;
mod external;
mod gates;
mod params;
mod state;
#[cfg(test)]
mod testing;

use tracing::{debug, warn};

use crate::auth_session::PolicySession;
use crate::config::{ConfigError, EngineConfig};
use crate::error::TpmError;
use crate::providers::Platform;
use crate::ticket::TicketEngine;
use crate::tpm_types::TPM_CC;

pub use compare::{check_condition, MAX_OPERAND_SIZE};
pub use compose::{PolicyAuthorizeNvParams, PolicyAuthorizeParams};
pub use external::{
    AuthorizationResponse, PolicySecretParams, PolicySignedParams, PolicyTicketParams,
};
pub use params::PolicyDuplicationSelectParams;
pub use state::{PolicyCounterTimerParams, PolicyNvParams};

// ---------------------------------------------------------------------------
// Checks: which validations an assertion performs
// ---------------------------------------------------------------------------

/// Validation strategy chosen by the session kind.
///
/// Range and binding checks always run. Checks against platform state and
/// signatures only run when the session is [`Checks::Enforced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checks {
    Enforced,
    Trial,
}

impl Checks {
    pub(crate) fn for_session(session: &PolicySession) -> Self {
        if session.is_trial() {
            Checks::Trial
        } else {
            Checks::Enforced
        }
    }

    pub(crate) fn is_enforced(self) -> bool {
        self == Checks::Enforced
    }

    /// Run `check` on a real session, skip it on a trial one
    pub(crate) fn run<T>(
        self,
        check: impl FnOnce() -> Result<T, TpmError>,
    ) -> Result<Option<T>, TpmError> {
        match self {
            Checks::Enforced => check().map(Some),
            Checks::Trial => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

/// Executes policy assertions against sessions using platform state.
pub struct PolicyEngine<'a> {
    platform: Platform<'a>,
    tickets: TicketEngine<'a>,
    config: EngineConfig,
}

impl<'a> PolicyEngine<'a> {
    /// Build an engine over `platform`, rejecting an invalid `config`.
    pub fn new(platform: Platform<'a>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(PolicyEngine {
            tickets: TicketEngine::new(platform.proofs, platform.clock, config.ticket_hash_alg),
            platform,
            config,
        })
    }

    pub fn platform(&self) -> &Platform<'a> {
        &self.platform
    }

    pub fn tickets(&self) -> &TicketEngine<'a> {
        &self.tickets
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Common entry for every assertion.
    ///
    /// A real session bound to PCR state fails as soon as that state moves,
    /// whatever the assertion.
    fn begin(&self, command_code: TPM_CC, session: &PolicySession) -> Result<Checks, TpmError> {
        let checks = Checks::for_session(session);
        if checks.is_enforced() {
            if let Some(generation) = session.pcr_generation() {
                let current = self.platform.pcrs.current_generation();
                if generation != current {
                    warn!(
                        command = command_code.name(),
                        generation, current, "PCR state changed under policy session"
                    );
                    return Err(TpmError::PcrChanged);
                }
            }
        }
        Ok(checks)
    }

    fn accepted(&self, command_code: TPM_CC, session: &PolicySession) {
        debug!(
            command = command_code.name(),
            trial = session.is_trial(),
            "policy assertion accepted"
        );
    }
}
