use log::info;

use super::Repository;
use crate::storage::{NvmStorage, StoreError};
use crate::types::{NameEncoding, User, UserName, UserType};

/// `"User-<id>"` with the id zero-padded to at least three digits, in the
/// requested encoding and truncated to `max_len` bytes.
///
/// UTF-16 names are big-endian and never truncated mid code unit.
pub fn default_user_name(uuid: u16, encoding: NameEncoding, max_len: usize) -> UserName {
    let mut text: heapless::String<16> = heapless::String::new();
    // "User-" plus at most 5 digits always fits.
    let _ = core::fmt::write(&mut text, format_args!("User-{:03}", uuid));

    let mut name = UserName::new();
    for byte in text.bytes() {
        let unit: &[u8] = match encoding {
            NameEncoding::Utf16 => &[0, byte],
            NameEncoding::Ascii | NameEncoding::AsciiExtended => &[byte],
        };
        if name.len() + unit.len() > max_len || name.extend_from_slice(unit).is_err() {
            break;
        }
    }
    name
}

impl<S: NvmStorage> Repository<S> {
    pub fn user(&mut self, uuid: u16) -> Result<User, StoreError> {
        self.store.user(uuid)
    }

    pub fn contains_user(&mut self, uuid: u16) -> Result<bool, StoreError> {
        self.store.contains_user(uuid)
    }

    /// First uuid greater than `after`; 0 starts the iteration.
    pub fn next_user(&mut self, after: u16) -> Result<Option<u16>, StoreError> {
        self.store.next_user(after)
    }

    pub fn user_count(&self) -> u16 {
        self.store.user_count()
    }

    /// Adds a user, filling in a default name when none is given. Returns the
    /// user as stored.
    pub fn add_user(&mut self, mut user: User) -> Result<User, StoreError> {
        self.normalize(&mut user);
        if user.name.is_empty() {
            user.name = default_user_name(
                user.uuid,
                user.name_encoding,
                self.config.max_user_name_len as usize,
            );
        }

        self.store.insert_user(&user)?;
        info!(" Added user {} ({:?})", user.uuid, user.kind);
        Ok(user)
    }

    /// Replaces an existing user. An empty name keeps the stored name.
    pub fn modify_user(&mut self, mut user: User) -> Result<User, StoreError> {
        let stored = self.store.user(user.uuid)?;
        self.normalize(&mut user);
        if user.name.is_empty() {
            user.name = stored.name;
            user.name_encoding = stored.name_encoding;
        }

        self.store.update_user(&user)?;
        info!(" Modified user {}", user.uuid);
        Ok(user)
    }

    /// Removes one user record. Credentials of the user are not touched; see
    /// [`Repository::delete_credentials`].
    pub fn remove_user(&mut self, uuid: u16) -> Result<(), StoreError> {
        self.store.remove_user(uuid)?;
        info!(" Removed user {}", uuid);
        Ok(())
    }

    /// Only expiring users keep a timeout.
    fn normalize(&self, user: &mut User) {
        if user.kind != UserType::Expiring {
            user.expiring_timeout_minutes = 0;
        }
    }
}
