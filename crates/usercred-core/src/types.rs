//! Domain types shared by the store, validation, checksum and learn modules.
//!
//! Enumerations carry their on-air numeric values as discriminants. Those
//! values feed the checksums, so they must never be renumbered.

use serde::{Deserialize, Serialize};

/// Largest user name, in bytes, any configuration may ask for.
pub const MAX_USER_NAME_BYTES: usize = 64;

/// Largest credential payload, in bytes, any configuration may ask for.
pub const MAX_CREDENTIAL_BYTES: usize = 64;

/// User name bytes, encoded according to [`NameEncoding`].
pub type UserName = heapless::Vec<u8, MAX_USER_NAME_BYTES>;

/// Raw credential payload (PIN digits, RFID UID, biometric template, ...).
pub type CredentialData = heapless::Vec<u8, MAX_CREDENTIAL_BYTES>;

/// Role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UserType {
    General = 0x00,
    Programming = 0x03,
    NonAccess = 0x04,
    Duress = 0x05,
    Disposable = 0x06,
    Expiring = 0x07,
    RemoteOnly = 0x09,
}

impl UserType {
    pub const ALL: [Self; 7] = [
        Self::General,
        Self::Programming,
        Self::NonAccess,
        Self::Duress,
        Self::Disposable,
        Self::Expiring,
        Self::RemoteOnly,
    ];

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.to_u8() == value)
    }

    /// Bit used for this type in [`crate::config::Config::supported_user_types`].
    pub const fn mask(self) -> u16 {
        1 << (self as u8)
    }
}

/// How many credentials a user must present to be granted access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CredentialRule {
    Single = 0x01,
    Dual = 0x02,
    Triple = 0x03,
}

impl CredentialRule {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Single),
            0x02 => Some(Self::Dual),
            0x03 => Some(Self::Triple),
            _ => None,
        }
    }

    pub const fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

/// Character encoding of a user name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NameEncoding {
    Ascii = 0x00,
    AsciiExtended = 0x01,
    Utf16 = 0x02,
}

impl NameEncoding {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Ascii),
            0x01 => Some(Self::AsciiExtended),
            0x02 => Some(Self::Utf16),
            _ => None,
        }
    }
}

/// Who last changed a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModifierType {
    Unknown = 0x01,
    /// A node on the control network, identified by `node_id`.
    Protocol = 0x02,
    /// The device itself (keypad, local enrollment, ...).
    Local = 0x03,
    MobileOrOtherTech = 0x04,
}

impl ModifierType {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Unknown),
            0x02 => Some(Self::Protocol),
            0x03 => Some(Self::Local),
            0x04 => Some(Self::MobileOrOtherTech),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifier {
    pub kind: ModifierType,
    pub node_id: u16,
}

impl Modifier {
    pub const fn local() -> Self {
        Self {
            kind: ModifierType::Local,
            node_id: 0,
        }
    }

    pub const fn protocol(node_id: u16) -> Self {
        Self {
            kind: ModifierType::Protocol,
            node_id,
        }
    }
}

impl Default for Modifier {
    fn default() -> Self {
        Self {
            kind: ModifierType::Unknown,
            node_id: 0,
        }
    }
}

/// Kind of credential. Declaration order matches the numeric order, which is
/// the primary sort key of the credential descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CredentialType {
    PinCode = 0x01,
    Password = 0x02,
    RfidCode = 0x03,
    Ble = 0x04,
    Nfc = 0x05,
    Uwb = 0x06,
    EyeBiometric = 0x07,
    FaceBiometric = 0x08,
    FingerBiometric = 0x09,
    HandBiometric = 0x0A,
    UnspecifiedBiometric = 0x0B,
}

impl CredentialType {
    pub const COUNT: usize = 11;

    pub const ALL: [Self; Self::COUNT] = [
        Self::PinCode,
        Self::Password,
        Self::RfidCode,
        Self::Ble,
        Self::Nfc,
        Self::Uwb,
        Self::EyeBiometric,
        Self::FaceBiometric,
        Self::FingerBiometric,
        Self::HandBiometric,
        Self::UnspecifiedBiometric,
    ];

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1..=11 => Some(Self::ALL[value as usize - 1]),
            _ => None,
        }
    }

    /// Position of this type in per-type configuration tables.
    pub const fn index(self) -> usize {
        self as usize - 1
    }
}

/// A user record as seen by the repositories and reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uuid: u16,
    pub kind: UserType,
    pub active: bool,
    pub expiring_timeout_minutes: u16,
    pub credential_rule: CredentialRule,
    pub name_encoding: NameEncoding,
    pub modifier: Modifier,
    pub name: UserName,
}

impl User {
    /// An active general user with no name; the repository fills in a
    /// default name on add.
    pub fn new(uuid: u16) -> Self {
        Self {
            uuid,
            kind: UserType::General,
            active: true,
            expiring_timeout_minutes: 0,
            credential_rule: CredentialRule::Single,
            name_encoding: NameEncoding::Ascii,
            modifier: Modifier::default(),
            name: UserName::new(),
        }
    }

    /// Replaces the name. Returns `None` if it does not fit the name buffer.
    pub fn with_name(mut self, encoding: NameEncoding, name: &[u8]) -> Option<Self> {
        self.name = UserName::from_slice(name).ok()?;
        self.name_encoding = encoding;
        Some(self)
    }
}

/// Key of a credential: owner plus the globally unique `(kind, slot)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialId {
    pub uuid: u16,
    pub kind: CredentialType,
    pub slot: u16,
}

impl CredentialId {
    pub const fn new(uuid: u16, kind: CredentialType, slot: u16) -> Self {
        Self { uuid, kind, slot }
    }

    /// Ordering key of the credential descriptor table.
    pub const fn order_key(&self) -> (CredentialType, u16) {
        (self.kind, self.slot)
    }
}

/// Everything about a credential except its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialMetadata {
    pub id: CredentialId,
    pub length: u8,
    pub modifier: Modifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub metadata: CredentialMetadata,
    pub data: CredentialData,
}

impl Credential {
    /// Builds a credential, deriving `length` from `data`. Returns `None` if
    /// the payload does not fit the credential buffer.
    pub fn new(id: CredentialId, modifier: Modifier, data: &[u8]) -> Option<Self> {
        let data = CredentialData::from_slice(data).ok()?;
        Some(Self {
            metadata: CredentialMetadata {
                id,
                length: data.len() as u8,
                modifier,
            },
            data,
        })
    }

    pub fn id(&self) -> &CredentialId {
        &self.metadata.id
    }
}
