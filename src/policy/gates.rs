//! Assertions that only set a requirement checked when the session is used,
//! plus digest retrieval and restart.

use super::PolicyEngine;
use crate::auth_session::PolicySession;
use crate::error::TpmError;
use crate::tpm_types::TPM_CC;

impl<'a> PolicyEngine<'a> {
    /// Require an HMAC proving knowledge of the object's authValue.
    pub fn policy_auth_value(&self, session: &mut PolicySession) -> Result<(), TpmError> {
        self.begin(TPM_CC::PolicyAuthValue, session)?;
        session.extend(TPM_CC::PolicyAuthValue, &[])?;
        session.flags.auth_value_needed = true;
        session.flags.password_needed = false;
        self.accepted(TPM_CC::PolicyAuthValue, session);
        Ok(())
    }

    /// Require the object's authValue in the clear.
    ///
    /// Produces the same digest as PolicyAuthValue.
    pub fn policy_password(&self, session: &mut PolicySession) -> Result<(), TpmError> {
        self.begin(TPM_CC::PolicyPassword, session)?;
        session.extend(TPM_CC::PolicyAuthValue, &[])?;
        session.flags.password_needed = true;
        session.flags.auth_value_needed = false;
        self.accepted(TPM_CC::PolicyPassword, session);
        Ok(())
    }

    pub fn policy_physical_presence(&self, session: &mut PolicySession) -> Result<(), TpmError> {
        self.begin(TPM_CC::PolicyPhysicalPresence, session)?;
        session.extend(TPM_CC::PolicyPhysicalPresence, &[])?;
        session.flags.physical_presence_required = true;
        self.accepted(TPM_CC::PolicyPhysicalPresence, session);
        Ok(())
    }

    /// Require the authorized NV index to have been written (or not).
    pub fn policy_nv_written(
        &self,
        session: &mut PolicySession,
        written_set: bool,
    ) -> Result<(), TpmError> {
        self.begin(TPM_CC::PolicyNvWritten, session)?;
        let flags = session.flags;
        if flags.check_nv_written && flags.nv_written_expected != written_set {
            return Err(TpmError::NvWrittenConflict(flags.nv_written_expected));
        }

        session.extend(TPM_CC::PolicyNvWritten, &[[written_set as u8].as_slice()])?;
        session.flags.check_nv_written = true;
        session.flags.nv_written_expected = written_set;
        self.accepted(TPM_CC::PolicyNvWritten, session);
        Ok(())
    }

    /// Current policy digest of `session`
    pub fn policy_get_digest(&self, session: &PolicySession) -> Vec<u8> {
        session.policy_digest().to_vec()
    }

    /// Discard the accumulated policy so the session can be reused.
    ///
    /// Always succeeds, including after the PCRs the policy was bound to
    /// have changed.
    pub fn policy_restart(&self, session: &mut PolicySession) {
        session.reset_policy();
        self.accepted(TPM_CC::PolicyRestart, session);
    }
}
