//! PolicySigned, PolicySecret and PolicyTicket.
//!
//! All three bind an authorization by some other entity into the policy and
//! share the same context update: `H(H(digest || CC || name) || policyRef)`.

use tracing::warn;

use super::PolicyEngine;
use crate::auth_session::{ParameterHashKind, PolicySession};
use crate::crypto::Crypto;
use crate::error::TpmError;
use crate::hash_chain::HashChain;
use crate::ticket::{check_cp_hash, AuthTicket, PackedTimeout, TicketFields};
use crate::tpm_types::*;

/// Arguments of PolicySigned
#[derive(Debug, Clone, Default)]
pub struct PolicySignedParams {
    pub auth_object: TPM_HANDLE,
    pub nonce_tpm: Vec<u8>,
    pub cp_hash_a: Vec<u8>,
    pub policy_ref: Vec<u8>,
    /// Seconds; negative requests a ticket
    pub expiration: i32,
    pub auth: TPMT_SIGNATURE,
}

/// Arguments of PolicySecret
#[derive(Debug, Clone, Default)]
pub struct PolicySecretParams {
    /// Entity whose authorization the caller has already proven
    pub auth_handle: TPM_HANDLE,
    pub nonce_tpm: Vec<u8>,
    pub cp_hash_a: Vec<u8>,
    pub policy_ref: Vec<u8>,
    pub expiration: i32,
}

/// Arguments of PolicyTicket
#[derive(Debug, Clone)]
pub struct PolicyTicketParams {
    /// The 8-byte timeout returned with the ticket
    pub timeout: Vec<u8>,
    pub cp_hash_a: Vec<u8>,
    pub policy_ref: Vec<u8>,
    /// Name of the entity that produced the original authorization
    pub auth_name: Vec<u8>,
    pub ticket: AuthTicket,
}

/// Result of PolicySigned and PolicySecret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    /// Packed timeout, empty when no ticket was issued
    pub timeout: Vec<u8>,
    pub policy_ticket: AuthTicket,
}

impl AuthorizationResponse {
    fn without_ticket(tag: TPM_ST) -> Self {
        AuthorizationResponse {
            timeout: Vec::new(),
            policy_ticket: AuthTicket::null(tag),
        }
    }
}

/// Inputs shared by the ticket-issuing assertions
struct Authorization<'p> {
    tag: TPM_ST,
    hierarchy: TPM_RH,
    entity_name: &'p [u8],
    nonce_tpm: &'p [u8],
    cp_hash_a: &'p [u8],
    policy_ref: &'p [u8],
}

impl<'a> PolicyEngine<'a> {
    /// Authorize with a signature over the session nonce and restrictions.
    pub fn policy_signed(
        &self,
        session: &mut PolicySession,
        params: &PolicySignedParams,
    ) -> Result<AuthorizationResponse, TpmError> {
        let checks = self.begin(TPM_CC::PolicySigned, session)?;
        check_cp_hash(session, &params.cp_hash_a)?;

        let auth_timeout = checks
            .run(|| {
                let auth_timeout = self.tickets.compute_auth_timeout(
                    session,
                    params.expiration,
                    &params.nonce_tpm,
                );
                self.tickets.parameter_checks(
                    session,
                    auth_timeout,
                    &params.cp_hash_a,
                    &params.nonce_tpm,
                )?;
                self.check_signature(params)?;
                Ok(auth_timeout)
            })?
            .unwrap_or_default();

        let entity_name = self.platform.names.name_of(&params.auth_object)?;
        let response = self.issue_ticket(
            session,
            params.expiration < 0,
            auth_timeout,
            &Authorization {
                tag: TPM_ST::AUTH_SIGNED,
                hierarchy: self.platform.names.hierarchy_of(&params.auth_object),
                entity_name: &entity_name,
                nonce_tpm: &params.nonce_tpm,
                cp_hash_a: &params.cp_hash_a,
                policy_ref: &params.policy_ref,
            },
        )?;

        self.record_authorization(
            session,
            TPM_CC::PolicySigned,
            &entity_name,
            &params.policy_ref,
            &params.cp_hash_a,
            auth_timeout,
        )?;
        Ok(response)
    }

    /// aHash = H(nonceTPM || expiration || cpHashA || policyRef), signed by
    /// the authorizing key
    fn check_signature(&self, params: &PolicySignedParams) -> Result<(), TpmError> {
        let verifier = self.platform.signatures;
        let hash_alg = verifier.signing_hash(&params.auth_object, &params.auth);
        if Crypto::digest_size(hash_alg) == 0 {
            return Err(TpmError::UnsupportedScheme);
        }

        let mut chain = HashChain::start(hash_alg)?;
        chain
            .update(&params.nonce_tpm)
            .update(&params.expiration.to_be_bytes())
            .update(&params.cp_hash_a)
            .update(&params.policy_ref);
        let a_hash = chain.finish();

        verifier
            .validate(&params.auth_object, &a_hash, &params.auth)
            .map_err(|err| {
                warn!(signer = params.auth_object.handle, %err, "PolicySigned signature rejected");
                err
            })
    }

    /// Authorize with proof of knowledge of an entity's authorization value.
    ///
    /// The caller has already checked that authorization for `auth_handle`.
    pub fn policy_secret(
        &self,
        session: &mut PolicySession,
        params: &PolicySecretParams,
    ) -> Result<AuthorizationResponse, TpmError> {
        let checks = self.begin(TPM_CC::PolicySecret, session)?;
        check_cp_hash(session, &params.cp_hash_a)?;

        let auth_timeout = checks
            .run(|| {
                let auth_timeout = self.tickets.compute_auth_timeout(
                    session,
                    params.expiration,
                    &params.nonce_tpm,
                );
                self.tickets.parameter_checks(
                    session,
                    auth_timeout,
                    &params.cp_hash_a,
                    &params.nonce_tpm,
                )?;
                Ok(auth_timeout)
            })?
            .unwrap_or_default();

        let names = self.platform.names;
        let entity_name = names.name_of(&params.auth_handle)?;
        let ticket_allowed = params.expiration < 0 && !names.is_pin_index(&params.auth_handle);
        let response = self.issue_ticket(
            session,
            ticket_allowed,
            auth_timeout,
            &Authorization {
                tag: TPM_ST::AUTH_SECRET,
                hierarchy: names.hierarchy_of(&params.auth_handle),
                entity_name: &entity_name,
                nonce_tpm: &params.nonce_tpm,
                cp_hash_a: &params.cp_hash_a,
                policy_ref: &params.policy_ref,
            },
        )?;

        self.record_authorization(
            session,
            TPM_CC::PolicySecret,
            &entity_name,
            &params.policy_ref,
            &params.cp_hash_a,
            auth_timeout,
        )?;
        Ok(response)
    }

    /// Replay an authorization captured earlier as a ticket.
    pub fn policy_ticket(
        &self,
        session: &mut PolicySession,
        params: &PolicyTicketParams,
    ) -> Result<(), TpmError> {
        self.begin(TPM_CC::PolicyTicket, session)?;
        if session.is_trial() {
            return Err(TpmError::TrialSessionTicket);
        }

        let timeout = PackedTimeout::from_bytes(&params.timeout)?;
        self.tickets
            .parameter_checks(session, timeout.timeout, &params.cp_hash_a, &[])?;

        let command_code = params.ticket.command_code()?;
        let fields = TicketFields {
            tag: params.ticket.tag,
            hierarchy: params.ticket.hierarchy,
            timeout,
            cp_hash: &params.cp_hash_a,
            policy_ref: &params.policy_ref,
            entity_name: &params.auth_name,
        };
        self.tickets
            .check_auth(&fields, &params.ticket.digest)
            .map_err(|err| {
                warn!(tag = ?params.ticket.tag, "PolicyTicket rejected");
                err
            })?;

        self.record_authorization(
            session,
            command_code,
            &params.auth_name,
            &params.policy_ref,
            &params.cp_hash_a,
            timeout.timeout,
        )
    }

    /// Tickets only come from real sessions asked for a negative expiration
    fn issue_ticket(
        &self,
        session: &PolicySession,
        requested: bool,
        auth_timeout: u64,
        auth: &Authorization<'_>,
    ) -> Result<AuthorizationResponse, TpmError> {
        if !requested || session.is_trial() {
            return Ok(AuthorizationResponse::without_ticket(auth.tag));
        }
        let timeout = PackedTimeout {
            timeout: auth_timeout,
            expires_on_reset: auth.nonce_tpm.is_empty(),
        };
        let policy_ticket = self.tickets.compute_auth(&TicketFields {
            tag: auth.tag,
            hierarchy: auth.hierarchy,
            timeout,
            cp_hash: auth.cp_hash_a,
            policy_ref: auth.policy_ref,
            entity_name: auth.entity_name,
        })?;
        Ok(AuthorizationResponse {
            timeout: timeout.to_bytes(),
            policy_ticket,
        })
    }

    /// Extend the digest with the authorizing entity and bind its
    /// restrictions to the session
    fn record_authorization(
        &self,
        session: &mut PolicySession,
        command_code: TPM_CC,
        entity_name: &[u8],
        policy_ref: &[u8],
        cp_hash_a: &[u8],
        auth_timeout: u64,
    ) -> Result<(), TpmError> {
        session.context_update(command_code, entity_name, policy_ref)?;
        if !cp_hash_a.is_empty() {
            session.bind_parameter_hash(ParameterHashKind::CpHash, cp_hash_a.to_vec());
        }
        session.lower_timeout(auth_timeout);
        self.accepted(command_code, session);
        Ok(())
    }
}
