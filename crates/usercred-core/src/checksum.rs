//! CRC-16/AUG-CCITT checksums over the stored users and credentials.
//!
//! A remote party compares these against its own copy to detect drift
//! without transferring the whole database. Multi-byte fields are fed
//! big-endian; an empty object set checksums to `0x0000`.

use crate::repository::Repository;
use crate::storage::{NvmStorage, StoreError};
use crate::types::{CredentialType, User};

const POLYNOMIAL: u16 = 0x1021;
const INITIAL: u16 = 0x1D0F;

/// Running CRC-16 (poly 0x1021, init 0x1D0F, no reflection, no final xor).
#[derive(Debug, Clone, Copy)]
pub struct Crc16 {
    value: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    pub const fn new() -> Self {
        Self { value: INITIAL }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.value ^= (byte as u16) << 8;
            for _ in 0..8 {
                self.value = if self.value & 0x8000 != 0 {
                    (self.value << 1) ^ POLYNOMIAL
                } else {
                    self.value << 1
                };
            }
        }
    }

    pub fn update_u8(&mut self, value: u8) {
        self.update(&[value]);
    }

    pub fn update_u16(&mut self, value: u16) {
        self.update(&value.to_be_bytes());
    }

    pub const fn finish(&self) -> u16 {
        self.value
    }
}

/// One-shot CRC over a byte slice.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(bytes);
    crc.finish()
}

/// Checksum of every credential of `kind`, across all owners, in slot order.
pub fn credential_type_checksum<S: NvmStorage>(
    repo: &mut Repository<S>,
    kind: CredentialType,
) -> Result<u16, StoreError> {
    let mut crc = Crc16::new();
    let mut fed = false;
    let mut cursor = None;
    while let Some(id) = repo.next_credential(None, Some(kind), cursor)? {
        cursor = Some(id.order_key());
        let credential = repo.credential(id.kind, id.slot)?;
        crc.update_u16(id.slot);
        crc.update_u8(credential.metadata.length);
        crc.update(&credential.data);
        fed = true;
    }
    Ok(if fed { crc.finish() } else { 0 })
}

/// Checksum of one user and all of its credentials; 0 when the user does
/// not exist.
pub fn user_checksum<S: NvmStorage>(repo: &mut Repository<S>, uuid: u16) -> Result<u16, StoreError> {
    let user = match repo.user(uuid) {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut crc = Crc16::new();
    feed_user(repo, &user, &mut crc)?;
    Ok(crc.finish())
}

/// Checksum of every user, in uuid order, each prefixed by its uuid.
pub fn all_users_checksum<S: NvmStorage>(repo: &mut Repository<S>) -> Result<u16, StoreError> {
    let mut crc = Crc16::new();
    let mut fed = false;
    let mut uuid = 0;
    while let Some(next) = repo.next_user(uuid)? {
        uuid = next;
        let user = repo.user(uuid)?;
        crc.update_u16(uuid);
        feed_user(repo, &user, &mut crc)?;
        fed = true;
    }
    Ok(if fed { crc.finish() } else { 0 })
}

fn feed_user<S: NvmStorage>(
    repo: &mut Repository<S>,
    user: &User,
    crc: &mut Crc16,
) -> Result<(), StoreError> {
    crc.update_u8(user.kind.to_u8());
    crc.update_u8(user.active as u8);
    crc.update_u8(user.credential_rule.to_u8());
    crc.update_u8(user.name_encoding.to_u8());
    crc.update_u8(user.name.len() as u8);
    crc.update(&user.name);

    let mut cursor = None;
    while let Some(id) = repo.next_credential(Some(user.uuid), None, cursor)? {
        cursor = Some(id.order_key());
        let credential = repo.credential(id.kind, id.slot)?;
        crc.update_u8(id.kind.to_u8());
        crc.update_u16(id.slot);
        crc.update_u8(credential.metadata.length);
        crc.update(&credential.data);
    }
    Ok(())
}
