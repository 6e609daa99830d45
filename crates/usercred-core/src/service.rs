//! Entry point for the protocol layer.
//!
//! [`UserCredentialService`] owns the repository, the validator and the
//! learn state machine, and checks every request before it reaches storage.

use log::{info, warn};

use crate::Error;
use crate::checksum;
use crate::config::Config;
use crate::learn::{CredentialLearn, Initiator, LearnObserver, LearnOperation, LearnTimer};
use crate::repository::Repository;
use crate::storage::{NvmStorage, StoreError};
use crate::types::{
    Credential, CredentialData, CredentialId, CredentialMetadata, CredentialType, User,
};
use crate::validation::{
    CredentialRejection, ManufacturerValidation, Validator, validate_admin_code,
    validate_new_metadata, validate_user,
};

pub struct UserCredentialService<S: NvmStorage, T: LearnTimer, O: LearnObserver> {
    repo: Repository<S>,
    validator: Validator,
    learn: CredentialLearn<T, O>,
}

impl<S: NvmStorage, T: LearnTimer, O: LearnObserver> UserCredentialService<S, T, O> {
    /// Validates `config` and opens the store on `storage`.
    pub fn new(storage: S, config: Config, timer: T, observer: O) -> Result<Self, Error> {
        config.validate()?;
        let repo = Repository::open(storage, config)?;
        info!(
            " User credential service ready: {} users, {} credentials",
            repo.user_count(),
            repo.credential_count()
        );
        Ok(Self {
            repo,
            validator: Validator::default(),
            learn: CredentialLearn::new(timer, observer),
        })
    }

    /// Replaces the default accept-all manufacturer rules.
    pub fn with_manufacturer_validation(
        mut self,
        rules: impl ManufacturerValidation + 'static,
    ) -> Self {
        self.validator = Validator::new(rules);
        self
    }

    pub fn config(&self) -> &Config {
        self.repo.config()
    }

    pub fn repository(&self) -> &Repository<S> {
        &self.repo
    }

    pub fn learn(&self) -> &CredentialLearn<T, O> {
        &self.learn
    }

    pub fn learn_mut(&mut self) -> &mut CredentialLearn<T, O> {
        &mut self.learn
    }

    pub fn into_storage(self) -> S {
        self.repo.into_storage()
    }

    // ----- users -----

    pub fn add_user(&mut self, user: User) -> Result<User, Error> {
        validate_user(self.repo.config(), &user)?;
        Ok(self.repo.add_user(user)?)
    }

    pub fn modify_user(&mut self, user: User) -> Result<User, Error> {
        validate_user(self.repo.config(), &user)?;
        Ok(self.repo.modify_user(user)?)
    }

    pub fn get_user(&mut self, uuid: u16) -> Result<User, Error> {
        Ok(self.repo.user(uuid)?)
    }

    /// First user after `after`; pass 0 to start.
    pub fn next_user(&mut self, after: u16) -> Result<Option<u16>, Error> {
        Ok(self.repo.next_user(after)?)
    }

    pub fn user_count(&self) -> u16 {
        self.repo.user_count()
    }

    /// Deletes a user together with all of its credentials.
    pub fn delete_user(&mut self, uuid: u16) -> Result<(), Error> {
        if !self.repo.contains_user(uuid)? {
            return Err(StoreError::NotFound.into());
        }
        self.repo.delete_credentials(Some(uuid), None)?;
        self.repo.remove_user(uuid)?;
        Ok(())
    }

    pub fn delete_all_users(&mut self) -> Result<(), Error> {
        self.repo.delete_credentials(None, None)?;
        while let Some(uuid) = self.repo.next_user(0)? {
            self.repo.remove_user(uuid)?;
        }
        info!(" Deleted all users");
        Ok(())
    }

    // ----- credentials -----

    /// Adds a credential. The `(type, slot)` pair must be free across all
    /// users.
    pub fn add_credential(&mut self, credential: &Credential) -> Result<(), Error> {
        let id = credential.id();
        validate_new_metadata(&mut self.repo, id)?;
        if self.repo.find_credential(id.kind, id.slot)?.is_some() {
            return Err(StoreError::Occupied.into());
        }
        self.validator.check_credential(&mut self.repo, credential)?;
        Ok(self.repo.add_credential(credential)?)
    }

    /// Replaces the payload and modifier of a credential the user owns.
    pub fn modify_credential(&mut self, credential: &Credential) -> Result<(), Error> {
        self.repo.owned_credential(credential.id())?;
        self.validator.check_credential(&mut self.repo, credential)?;
        Ok(self.repo.modify_credential(credential)?)
    }

    pub fn get_credential(&mut self, id: &CredentialId) -> Result<Credential, Error> {
        Ok(self.repo.owned_credential(id)?)
    }

    /// Successor of `after` in `(type, slot)` order; `None` filters match
    /// everything.
    pub fn next_credential(
        &mut self,
        owner: Option<u16>,
        kind: Option<CredentialType>,
        after: Option<(CredentialType, u16)>,
    ) -> Result<Option<CredentialId>, Error> {
        Ok(self.repo.next_credential(owner, kind, after)?)
    }

    pub fn credential_count(&self) -> u16 {
        self.repo.credential_count()
    }

    pub fn count_credentials(
        &mut self,
        owner: Option<u16>,
        kind: Option<CredentialType>,
    ) -> Result<u16, Error> {
        Ok(self.repo.count_credentials(owner, kind)?)
    }

    pub fn delete_credential(&mut self, id: &CredentialId) -> Result<(), Error> {
        Ok(self.repo.delete_credential(id)?)
    }

    /// Bulk delete; returns how many credentials were removed.
    pub fn delete_credentials(
        &mut self,
        owner: Option<u16>,
        kind: Option<CredentialType>,
    ) -> Result<u16, Error> {
        Ok(self.repo.delete_credentials(owner, kind)?)
    }

    /// Moves a credential to another user and/or slot of the same type.
    pub fn move_credential(
        &mut self,
        kind: CredentialType,
        source_uuid: u16,
        source_slot: u16,
        destination_uuid: u16,
        destination_slot: u16,
    ) -> Result<(), Error> {
        let type_config = self.repo.config().credential_type(kind);
        if !type_config.supported {
            return Err(CredentialRejection::UnsupportedType(kind).into());
        }
        if destination_slot == 0 || destination_slot > type_config.max_slots {
            return Err(CredentialRejection::InvalidSlot(destination_slot).into());
        }
        for uuid in [source_uuid, destination_uuid] {
            if !self.repo.contains_user(uuid)? {
                return Err(CredentialRejection::UnknownUser(uuid).into());
            }
        }
        Ok(self.repo.move_credential(
            kind,
            source_uuid,
            source_slot,
            destination_uuid,
            destination_slot,
        )?)
    }

    // ----- checksums -----

    pub fn all_users_checksum(&mut self) -> Result<u16, Error> {
        if !self.repo.config().checksums.all_users {
            return Err(Error::Unsupported);
        }
        Ok(checksum::all_users_checksum(&mut self.repo)?)
    }

    pub fn user_checksum(&mut self, uuid: u16) -> Result<u16, Error> {
        if !self.repo.config().checksums.user {
            return Err(Error::Unsupported);
        }
        Ok(checksum::user_checksum(&mut self.repo, uuid)?)
    }

    pub fn credential_type_checksum(&mut self, kind: CredentialType) -> Result<u16, Error> {
        if !self.repo.config().checksums.credential_type {
            return Err(Error::Unsupported);
        }
        Ok(checksum::credential_type_checksum(&mut self.repo, kind)?)
    }

    // ----- admin code -----

    /// Stored admin code; empty when deactivated or never set.
    pub fn admin_code(&mut self) -> Result<CredentialData, Error> {
        if !self.repo.config().admin_code_supported {
            return Err(Error::Unsupported);
        }
        Ok(self.repo.store_mut().admin_code()?)
    }

    /// Sets the admin code; an empty code deactivates it where allowed.
    pub fn set_admin_code(&mut self, code: &[u8]) -> Result<(), Error> {
        validate_admin_code(&mut self.repo, code)?;
        self.repo.store_mut().write_admin_code(code)?;
        if code.is_empty() {
            warn!(" Admin code deactivated");
        } else {
            info!(" Admin code updated");
        }
        Ok(())
    }

    // ----- credential learn -----

    pub fn learn_start(
        &mut self,
        operation: LearnOperation,
        target: CredentialId,
        timeout_s: u8,
        initiator: Initiator,
    ) -> Result<(), Error> {
        Ok(self
            .learn
            .start(&mut self.repo, operation, target, timeout_s, initiator)?)
    }

    pub fn learn_step_start(&mut self, remaining: u8) -> Result<(), Error> {
        Ok(self.learn.step_start(remaining)?)
    }

    pub fn learn_step_retry(&mut self, remaining: u8) -> Result<(), Error> {
        Ok(self.learn.step_retry(remaining)?)
    }

    pub fn learn_read_done(&mut self, data: &[u8]) -> Result<Option<CredentialMetadata>, Error> {
        Ok(self
            .learn
            .read_done(&mut self.repo, &self.validator, data)?)
    }

    pub fn learn_cancel_local(&mut self) -> Result<(), Error> {
        Ok(self.learn.cancel_local()?)
    }

    pub fn learn_cancel_remote(&mut self, node_id: u16) -> Result<(), Error> {
        Ok(self.learn.cancel_remote(node_id)?)
    }

    /// Call when the learn timer fires.
    pub fn learn_timeout(&mut self) {
        self.learn.timeout();
    }
}
