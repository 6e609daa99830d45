//! Binary layout of descriptor rows and record slots.
//!
//! Descriptor rows have a fixed little-endian layout so the tables can be
//! written in one call. Record metadata is postcard-encoded into fixed-stride
//! slots; names and credential payloads live in their own areas.

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::types::{CredentialId, CredentialRule, CredentialType, Modifier, NameEncoding, UserType};

/// Size of a persisted object count.
pub const COUNT_SIZE: usize = 2;

/// Stride of a user record slot.
pub const USER_RECORD_SIZE: usize = 16;

/// Stride of a credential record slot.
pub const CREDENTIAL_RECORD_SIZE: usize = 8;

/// Row of the user descriptor table.
///
/// Binary format (little-endian):
/// - uuid: 2 bytes
/// - slot: 2 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDescriptor {
    pub uuid: u16,
    pub slot: u16,
}

impl UserDescriptor {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.uuid.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.slot.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            uuid: u16::from_le_bytes([bytes[0], bytes[1]]),
            slot: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// Row of the credential descriptor table.
///
/// Binary format (little-endian):
/// - uuid: 2 bytes
/// - type: 1 byte
/// - reserved: 1 byte
/// - credential slot: 2 bytes
/// - storage slot: 2 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialDescriptor {
    pub id: CredentialId,
    pub storage_slot: u16,
}

impl CredentialDescriptor {
    pub const SIZE: usize = 8;

    pub fn key(&self) -> (CredentialType, u16) {
        self.id.order_key()
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.id.uuid.to_le_bytes());
        bytes[2] = self.id.kind.to_u8();
        bytes[4..6].copy_from_slice(&self.id.slot.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.storage_slot.to_le_bytes());
        bytes
    }

    /// Returns `None` if the type byte is not a known credential type.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let kind = CredentialType::from_u8(bytes[2])?;
        Some(Self {
            id: CredentialId {
                uuid: u16::from_le_bytes([bytes[0], bytes[1]]),
                kind,
                slot: u16::from_le_bytes([bytes[4], bytes[5]]),
            },
            storage_slot: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}

/// Fixed part of a user, stored in the user record slot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRecord {
    pub kind: UserType,
    pub active: bool,
    pub expiring_timeout_minutes: u16,
    pub credential_rule: CredentialRule,
    pub name_encoding: NameEncoding,
    pub modifier: Modifier,
    pub name_len: u8,
}

/// Fixed part of a credential, stored in the credential record slot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialRecord {
    pub length: u8,
    pub modifier: Modifier,
}

pub fn encode_record<T: Serialize, const N: usize>(record: &T) -> Result<[u8; N], StoreError> {
    let mut bytes = [0u8; N];
    postcard::to_slice(record, &mut bytes).map_err(|_| StoreError::Generic)?;
    Ok(bytes)
}

pub fn decode_record<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T, StoreError> {
    postcard::from_bytes(bytes).map_err(|_| StoreError::Generic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModifierType;

    #[test]
    fn test_credential_descriptor_layout() {
        let row = CredentialDescriptor {
            id: CredentialId::new(0x0102, CredentialType::RfidCode, 0x0304),
            storage_slot: 7,
        };
        let bytes = row.to_bytes();
        assert_eq!(bytes, [0x02, 0x01, 0x03, 0x00, 0x04, 0x03, 0x07, 0x00]);
        assert_eq!(CredentialDescriptor::from_bytes(&bytes), Some(row));

        let mut corrupt = bytes;
        corrupt[2] = 0;
        assert_eq!(CredentialDescriptor::from_bytes(&corrupt), None);
    }

    #[test]
    fn test_worst_case_user_record_fits_slot() {
        let record = UserRecord {
            kind: UserType::RemoteOnly,
            active: true,
            expiring_timeout_minutes: u16::MAX,
            credential_rule: CredentialRule::Triple,
            name_encoding: NameEncoding::Utf16,
            modifier: Modifier {
                kind: ModifierType::MobileOrOtherTech,
                node_id: u16::MAX,
            },
            name_len: u8::MAX,
        };
        let bytes: [u8; USER_RECORD_SIZE] = encode_record(&record).unwrap();
        assert_eq!(decode_record::<UserRecord>(&bytes), Ok(record));
    }

    #[test]
    fn test_worst_case_credential_record_fits_slot() {
        let record = CredentialRecord {
            length: u8::MAX,
            modifier: Modifier::protocol(u16::MAX),
        };
        let bytes: [u8; CREDENTIAL_RECORD_SIZE] = encode_record(&record).unwrap();
        assert_eq!(decode_record::<CredentialRecord>(&bytes), Ok(record));
    }
}
