/*
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the MIT License. See the LICENSE file in the project root for full license information.
 */

//! TPM 2.0 enhanced-authorization policy sessions.
//!
//! A [`PolicySession`] accumulates a policy digest as assertions are made
//! against it through a [`PolicyEngine`]. Trial sessions compute the digest
//! a policy will have without checking anything against the platform; real
//! sessions check every condition before extending.
//!
//! ```no_run
//! use tss_policy::{PolicyEngine, PolicySession, TPM_ALG_ID, TPM_CC};
//! # fn platform() -> tss_policy::Platform<'static> { unimplemented!() }
//!
//! let engine = PolicyEngine::new(platform(), Default::default())?;
//! let mut trial = PolicySession::trial(TPM_ALG_ID::SHA256)?;
//! engine.policy_command_code(&mut trial, TPM_CC::Unseal as u32)?;
//! engine.policy_auth_value(&mut trial)?;
//! let policy = engine.policy_get_digest(&trial);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod tpm_structure;
pub mod tpm_types;

pub mod auth_session;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hash_chain;
pub mod policy;
pub mod providers;
pub mod session_table;
pub mod ticket;
pub mod tpm_buffer;
mod tpm_type_extensions;

pub use auth_session::{BoundParameterHash, ParameterHashKind, PolicyFlags, PolicySession};
pub use config::{ConfigError, EngineConfig};
pub use crypto::{Crypto, RsaSsaVerifier};
pub use error::{ErrorKind, TpmError};
pub use hash_chain::HashChain;
pub use policy::*;
pub use providers::{
    ClockProvider, HierarchyProofs, NameResolver, NvStore, PcrProvider, Platform,
    SignatureVerifier, StaticProofs, TimeInfo,
};
pub use session_table::{SessionHandle, SessionTable};
pub use ticket::{AuthTicket, PackedTimeout, TicketEngine, TicketFields, VerifiedTicket};
pub use tpm_buffer::TpmBuffer;
pub use tpm_structure::{TpmEnum, TpmMarshaller};
pub use tpm_types::*;
