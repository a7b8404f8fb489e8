//! Assertions that bind the session to the parameters of the authorized
//! command. All four share one slot, so at most one kind can be bound.

use super::PolicyEngine;
use crate::auth_session::{ParameterHashKind, PolicySession};
use crate::error::TpmError;
use crate::hash_chain::HashChain;
use crate::tpm_structure::TpmEnum;
use crate::tpm_types::*;

/// Arguments of PolicyDuplicationSelect
#[derive(Debug, Clone, Default)]
pub struct PolicyDuplicationSelectParams {
    pub object_name: Vec<u8>,
    pub new_parent_name: Vec<u8>,
    /// Whether the object name is part of the policy digest
    pub include_object: bool,
}

impl<'a> PolicyEngine<'a> {
    /// Bind the command parameter hash.
    pub fn policy_cp_hash(
        &self,
        session: &mut PolicySession,
        cp_hash_a: &[u8],
    ) -> Result<(), TpmError> {
        self.bind_digest(session, TPM_CC::PolicyCpHash, ParameterHashKind::CpHash, cp_hash_a)
    }

    /// Bind the hash of the handle names of the authorized command.
    pub fn policy_name_hash(
        &self,
        session: &mut PolicySession,
        name_hash: &[u8],
    ) -> Result<(), TpmError> {
        self.bind_digest(
            session,
            TPM_CC::PolicyNameHash,
            ParameterHashKind::NameHash,
            name_hash,
        )
    }

    /// Bind the template of an object to be created.
    pub fn policy_template(
        &self,
        session: &mut PolicySession,
        template_hash: &[u8],
    ) -> Result<(), TpmError> {
        self.bind_digest(
            session,
            TPM_CC::PolicyTemplate,
            ParameterHashKind::TemplateHash,
            template_hash,
        )
    }

    fn bind_digest(
        &self,
        session: &mut PolicySession,
        command_code: TPM_CC,
        kind: ParameterHashKind,
        digest: &[u8],
    ) -> Result<(), TpmError> {
        self.begin(command_code, session)?;
        if digest.len() != session.digest_size() {
            return Err(TpmError::SizeMismatch {
                what: command_code.name(),
                expected: session.digest_size(),
                actual: digest.len(),
            });
        }
        session.check_parameter_hash(kind, digest)?;

        session.extend(command_code, &[digest])?;
        session.bind_parameter_hash(kind, digest.to_vec());
        self.accepted(command_code, session);
        Ok(())
    }

    /// Restrict duplication of an object to a chosen new parent.
    pub fn policy_duplication_select(
        &self,
        session: &mut PolicySession,
        params: &PolicyDuplicationSelectParams,
    ) -> Result<(), TpmError> {
        let checks = self.begin(TPM_CC::PolicyDuplicationSelect, session)?;
        session.check_command_code(TPM_CC::Duplicate.get_value())?;

        let mut chain = HashChain::start(session.hash_alg())?;
        chain.update(&params.object_name).update(&params.new_parent_name);
        let name_hash = chain.finish();

        let kind = ParameterHashKind::DuplicationSelect;
        match (checks.is_enforced(), session.bound_parameter_hash()) {
            (true, Some(bound)) => {
                return Err(TpmError::ParameterHashConflict {
                    bound: bound.kind,
                    requested: kind,
                })
            }
            (true, None) => {}
            (false, _) => {
                session.check_parameter_hash(kind, &name_hash)?;
            }
        }

        let object_name: &[u8] = if params.include_object {
            &params.object_name
        } else {
            &[]
        };
        session.extend(
            TPM_CC::PolicyDuplicationSelect,
            &[
                object_name,
                params.new_parent_name.as_slice(),
                [params.include_object as u8].as_slice(),
            ],
        )?;
        session.bind_parameter_hash(kind, name_hash);
        session.bound_command = Some(TPM_CC::Duplicate);
        self.accepted(TPM_CC::PolicyDuplicationSelect, session);
        Ok(())
    }
}
