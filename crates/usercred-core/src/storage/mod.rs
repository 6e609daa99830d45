//! Persistent object store for users and credentials.
//!
//! The store sits on top of a byte-addressable non-volatile memory split into
//! a handful of logical areas:
//!
//! ```text
//! UserCount              u16
//! CredentialCount        u16
//! UserDescriptors        [uuid u16 | slot u16] * max_users, sorted by uuid
//! UserRecords            16-byte postcard record per slot
//! UserNames              max_user_name_len bytes per slot
//! CredentialDescriptors  [uuid u16 | type u8 | - | slot u16 | storage slot u16] * max_credentials,
//!                        sorted by (type, slot)
//! CredentialRecords      8-byte postcard record per slot
//! CredentialData         credential_data_stride bytes per slot
//! AdminCode              length u8 | digits
//! ```
//!
//! Descriptor tables are the only indirection: a record slot is free exactly
//! when no descriptor row points at it. Only the first `count` rows of a
//! descriptor table are meaningful.
//!
//! Writes are not atomic as a group. An insert writes the record, then the
//! descriptor table, then the count; a power loss between those writes can
//! leave the table and the count disagreeing. A count write that fails with
//! an error leaves the same disagreement behind while the store stays open;
//! the effects are listed on the store's count commit. This is a known gap;
//! [`Store::open`] only rejects counts that exceed the configured capacity.

mod allocator;
mod layout;
mod memory;
mod store;

pub use allocator::SlotAllocator;
pub use memory::MemoryStorage;
pub use store::{Store, StoreLayout};

use thiserror_no_std::Error;

/// Logical regions of the non-volatile memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    UserCount,
    CredentialCount,
    UserDescriptors,
    UserRecords,
    UserNames,
    CredentialDescriptors,
    CredentialRecords,
    CredentialData,
    AdminCode,
}

impl Area {
    pub const COUNT: usize = 9;

    pub const ALL: [Self; Self::COUNT] = [
        Self::UserCount,
        Self::CredentialCount,
        Self::UserDescriptors,
        Self::UserRecords,
        Self::UserNames,
        Self::CredentialDescriptors,
        Self::CredentialRecords,
        Self::CredentialData,
        Self::AdminCode,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Durable byte storage addressed by area and offset.
///
/// Each individual `write` is assumed to be power-loss atomic; nothing is
/// assumed across calls.
pub trait NvmStorage {
    type Error: core::fmt::Debug;

    /// Fills `buf` from `offset`. Bytes never written read back as zero.
    fn read(&mut self, area: Area, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error>;

    fn write(&mut self, area: Area, offset: usize, data: &[u8]) -> Result<(), Self::Error>;
}

impl<T: NvmStorage + ?Sized> NvmStorage for &mut T {
    type Error = T::Error;

    fn read(&mut self, area: Area, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(area, offset, buf)
    }

    fn write(&mut self, area: Area, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write(area, offset, data)
    }
}

/// Result taxonomy of the object store. Success is `Ok`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistent storage access failed")]
    Io,
    #[error("no record is bound to the key")]
    NotFound,
    #[error("storage capacity reached")]
    Full,
    #[error("key is already bound to a record")]
    Occupied,
    #[error("persistent data is inconsistent")]
    Generic,
}
