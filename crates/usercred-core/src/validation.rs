//! Gatekeeping applied before anything reaches the repositories.
//!
//! Every check reports the exact reason it failed so the protocol layer can
//! put it in its rejection report.

use alloc::boxed::Box;

use log::{debug, warn};
use thiserror_no_std::Error as ThisError;

use crate::Error;
use crate::config::Config;
use crate::repository::Repository;
use crate::storage::{NvmStorage, StoreError};
use crate::types::{
    Credential, CredentialId, CredentialMetadata, CredentialRule, CredentialType, NameEncoding,
    User, UserType,
};

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRejection {
    #[error("user id {0} is out of range")]
    InvalidUuid(u16),
    #[error("user type {0:?} is not supported")]
    UnsupportedType(UserType),
    #[error("credential rule {0:?} is not supported")]
    UnsupportedRule(CredentialRule),
    #[error("name of {0} bytes is too long")]
    NameTooLong(usize),
    #[error("UTF-16 name has an odd byte count")]
    MalformedName,
}

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRejection {
    #[error("credential type {0:?} is not supported")]
    UnsupportedType(CredentialType),
    #[error("user id {0} is out of range")]
    InvalidUuid(u16),
    #[error("slot {0} is out of range")]
    InvalidSlot(u16),
    #[error("user {0} does not exist")]
    UnknownUser(u16),
    #[error("payload length {0} is out of range")]
    InvalidLength(usize),
    #[error("payload contains bytes not allowed for this type")]
    InvalidContent,
    #[error("payload duplicates credential {0:?}")]
    Duplicate(CredentialMetadata),
    #[error("payload duplicates the admin code")]
    DuplicateAdminCode,
    #[error("rejected by manufacturer security rules")]
    Manufacturer,
}

/// Device-specific acceptance rules, e.g. refusing trivially guessable PINs.
pub trait ManufacturerValidation {
    fn accept(&self, candidate: &Credential) -> bool;
}

/// Accepts every credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ManufacturerValidation for AcceptAll {
    fn accept(&self, _candidate: &Credential) -> bool {
        true
    }
}

/// Checks a user against the configured capabilities.
pub fn validate_user(config: &Config, user: &User) -> Result<(), UserRejection> {
    if user.uuid == 0 || user.uuid > config.max_users {
        return Err(UserRejection::InvalidUuid(user.uuid));
    }
    if !config.supports_user_type(user.kind) {
        return Err(UserRejection::UnsupportedType(user.kind));
    }
    if !config.supports_credential_rule(user.credential_rule) {
        return Err(UserRejection::UnsupportedRule(user.credential_rule));
    }
    if user.name.len() > config.max_user_name_len as usize {
        return Err(UserRejection::NameTooLong(user.name.len()));
    }
    if user.name_encoding == NameEncoding::Utf16 && user.name.len() % 2 != 0 {
        return Err(UserRejection::MalformedName);
    }
    Ok(())
}

/// Checks the key of a credential about to be added: supported type, uuid
/// and slot in range, owner exists.
pub fn validate_new_metadata<S: NvmStorage>(
    repo: &mut Repository<S>,
    id: &CredentialId,
) -> Result<(), Error> {
    let config = repo.config();
    let type_config = config.credential_type(id.kind);
    if !type_config.supported {
        return Err(CredentialRejection::UnsupportedType(id.kind).into());
    }
    if id.uuid == 0 || id.uuid > config.max_users {
        return Err(CredentialRejection::InvalidUuid(id.uuid).into());
    }
    if id.slot == 0 || id.slot > type_config.max_slots {
        return Err(CredentialRejection::InvalidSlot(id.slot).into());
    }
    if !repo.contains_user(id.uuid)? {
        return Err(CredentialRejection::UnknownUser(id.uuid).into());
    }
    Ok(())
}

/// Boolean form of [`validate_new_metadata`]; storage failures count as
/// invalid.
pub fn is_valid_new_metadata<S: NvmStorage>(repo: &mut Repository<S>, id: &CredentialId) -> bool {
    validate_new_metadata(repo, id).is_ok()
}

/// Checks payload length and, for PIN codes, that only ASCII digits are used.
pub fn validate_data(
    config: &Config,
    kind: CredentialType,
    data: &[u8],
) -> Result<(), CredentialRejection> {
    let type_config = config.credential_type(kind);
    if !type_config.supported {
        return Err(CredentialRejection::UnsupportedType(kind));
    }
    if data.len() < type_config.min_length as usize || data.len() > type_config.max_length as usize
    {
        return Err(CredentialRejection::InvalidLength(data.len()));
    }
    if kind == CredentialType::PinCode && !data.iter().all(u8::is_ascii_digit) {
        return Err(CredentialRejection::InvalidContent);
    }
    Ok(())
}

/// First stored credential, of any type and owner, whose payload equals the
/// candidate's. The candidate's own key never counts as a duplicate.
pub fn find_duplicate<S: NvmStorage>(
    repo: &mut Repository<S>,
    candidate: &Credential,
) -> Result<Option<CredentialMetadata>, StoreError> {
    let mut cursor = None;
    while let Some(id) = repo.next_credential(None, None, cursor)? {
        cursor = Some(id.order_key());
        if id == *candidate.id() {
            continue;
        }
        let existing = repo.credential(id.kind, id.slot)?;
        if existing.data == candidate.data {
            debug!(
                " Candidate {:?}/{} duplicates {:?}/{}",
                candidate.id().kind,
                candidate.id().slot,
                id.kind,
                id.slot
            );
            return Ok(Some(existing.metadata));
        }
    }
    Ok(None)
}

/// Whether a PIN candidate equals the stored admin code.
pub fn matches_admin_code<S: NvmStorage>(
    repo: &mut Repository<S>,
    candidate: &Credential,
) -> Result<bool, StoreError> {
    if candidate.id().kind != CredentialType::PinCode || !repo.config().admin_code_supported {
        return Ok(false);
    }
    let admin_code = repo.store_mut().admin_code()?;
    Ok(!admin_code.is_empty() && admin_code == candidate.data)
}

/// Checks an admin code before it is stored. An empty code deactivates it.
pub fn validate_admin_code<S: NvmStorage>(
    repo: &mut Repository<S>,
    code: &[u8],
) -> Result<(), Error> {
    let config = repo.config();
    if !config.admin_code_supported {
        return Err(Error::Unsupported);
    }
    if code.is_empty() {
        return if config.admin_code_deactivation_supported {
            Ok(())
        } else {
            Err(Error::Unsupported)
        };
    }
    validate_data(config, CredentialType::PinCode, code)?;

    let mut cursor = None;
    while let Some(id) = repo.next_credential(None, Some(CredentialType::PinCode), cursor)? {
        cursor = Some(id.order_key());
        let existing = repo.credential(id.kind, id.slot)?;
        if existing.data.as_slice() == code {
            return Err(CredentialRejection::Duplicate(existing.metadata).into());
        }
    }
    Ok(())
}

/// Full admission check for credentials, including the pluggable
/// manufacturer rules.
pub struct Validator {
    manufacturer: Box<dyn ManufacturerValidation>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(AcceptAll)
    }
}

impl Validator {
    pub fn new(manufacturer: impl ManufacturerValidation + 'static) -> Self {
        Self {
            manufacturer: Box::new(manufacturer),
        }
    }

    /// Duplicate rejection combined with the manufacturer rules.
    pub fn accept<S: NvmStorage>(
        &self,
        repo: &mut Repository<S>,
        candidate: &Credential,
    ) -> Result<(), Error> {
        if let Some(existing) = find_duplicate(repo, candidate)? {
            return Err(CredentialRejection::Duplicate(existing).into());
        }
        if matches_admin_code(repo, candidate)? {
            return Err(CredentialRejection::DuplicateAdminCode.into());
        }
        if !self.manufacturer.accept(candidate) {
            warn!(
                " Manufacturer rules rejected credential {:?}/{}",
                candidate.id().kind,
                candidate.id().slot
            );
            return Err(CredentialRejection::Manufacturer.into());
        }
        Ok(())
    }

    /// Everything a new or replacement credential must pass: key, payload,
    /// uniqueness and manufacturer rules.
    pub fn check_credential<S: NvmStorage>(
        &self,
        repo: &mut Repository<S>,
        candidate: &Credential,
    ) -> Result<(), Error> {
        validate_new_metadata(repo, candidate.id())?;
        validate_data(repo.config(), candidate.id().kind, &candidate.data)?;
        self.accept(repo, candidate)
    }
}
