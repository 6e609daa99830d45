use alloc::vec::Vec;

use log::{debug, error, info};

use super::layout::{
    COUNT_SIZE, CREDENTIAL_RECORD_SIZE, CredentialDescriptor, CredentialRecord, USER_RECORD_SIZE,
    UserDescriptor, UserRecord, decode_record, encode_record,
};
use super::{Area, NvmStorage, SlotAllocator, StoreError};
use crate::config::Config;
use crate::types::{
    Credential, CredentialData, CredentialId, CredentialMetadata, CredentialType,
    MAX_CREDENTIAL_BYTES, User, UserName,
};

/// Capacities and strides that fix where everything lives in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    pub max_users: u16,
    pub max_credentials: u16,
    pub name_stride: usize,
    pub data_stride: usize,
}

impl StoreLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_users: config.max_users,
            max_credentials: config.max_credentials,
            name_stride: config.max_user_name_len as usize,
            data_stride: config.credential_data_stride(),
        }
    }
}

/// Capacity-bounded keyed storage for users and credentials.
///
/// Every lookup reads the relevant descriptor table from storage and scans
/// it; capacities are small enough that this is cheaper than keeping a RAM
/// mirror consistent. The only RAM state is the two object counts and the
/// allocation hints.
pub struct Store<S: NvmStorage> {
    nvm: S,
    layout: StoreLayout,
    user_count: u16,
    credential_count: u16,
    user_slots: SlotAllocator,
    credential_slots: SlotAllocator,
}

impl<S: NvmStorage> Store<S> {
    /// Opens a store over previously persisted (or blank) storage.
    pub fn open(nvm: S, layout: StoreLayout) -> Result<Self, StoreError> {
        let mut store = Self {
            nvm,
            layout,
            user_count: 0,
            credential_count: 0,
            user_slots: SlotAllocator::new(layout.max_users),
            credential_slots: SlotAllocator::new(layout.max_credentials),
        };

        let user_count = store.read_count(Area::UserCount)?;
        let credential_count = store.read_count(Area::CredentialCount)?;
        if user_count > layout.max_users || credential_count > layout.max_credentials {
            error!(
                " Persisted counts exceed capacity: users {} / {}, credentials {} / {}",
                user_count, layout.max_users, credential_count, layout.max_credentials
            );
            return Err(StoreError::Generic);
        }

        store.user_count = user_count;
        store.credential_count = credential_count;
        info!(
            " Opened user credential store: {} users, {} credentials",
            user_count, credential_count
        );
        Ok(store)
    }

    /// Forgets every user and credential. Record bytes are left in place.
    pub fn format(&mut self) -> Result<(), StoreError> {
        self.write_count(Area::CredentialCount, 0)?;
        self.credential_count = 0;
        self.write_count(Area::UserCount, 0)?;
        self.user_count = 0;
        info!(" Formatted user credential store");
        Ok(())
    }

    pub fn user_count(&self) -> u16 {
        self.user_count
    }

    pub fn credential_count(&self) -> u16 {
        self.credential_count
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.nvm
    }

    pub fn into_storage(self) -> S {
        self.nvm
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    pub fn user(&mut self, uuid: u16) -> Result<User, StoreError> {
        let table = self.user_table()?;
        let row = table
            .iter()
            .find(|row| row.uuid == uuid)
            .ok_or(StoreError::NotFound)?;
        self.read_user_slot(row.uuid, row.slot)
    }

    pub fn contains_user(&mut self, uuid: u16) -> Result<bool, StoreError> {
        Ok(self.user_table()?.iter().any(|row| row.uuid == uuid))
    }

    /// First uuid strictly greater than `after`; pass 0 to start.
    pub fn next_user(&mut self, after: u16) -> Result<Option<u16>, StoreError> {
        Ok(self
            .user_table()?
            .iter()
            .map(|row| row.uuid)
            .find(|&uuid| uuid > after))
    }

    /// Uuid 0 is the iteration start marker and cannot be stored.
    pub fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        if user.uuid == 0 {
            return Err(StoreError::Generic);
        }
        let mut table = self.user_table()?;
        let position = table.partition_point(|row| row.uuid < user.uuid);
        if table.get(position).is_some_and(|row| row.uuid == user.uuid) {
            return Err(StoreError::Occupied);
        }
        if table.len() >= self.layout.max_users as usize {
            return Err(StoreError::Full);
        }

        let slot = self
            .user_slots
            .allocate(|slot| table.iter().any(|row| row.slot == slot))
            .ok_or(StoreError::Full)?;
        self.write_user_slot(slot, user)?;

        table.insert(
            position,
            UserDescriptor {
                uuid: user.uuid,
                slot,
            },
        );
        self.write_user_table(&table)?;
        self.commit_count(Area::UserCount, table.len())?;

        debug!(" Inserted user {} into slot {}", user.uuid, slot);
        Ok(())
    }

    pub fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let table = self.user_table()?;
        let row = table
            .iter()
            .find(|row| row.uuid == user.uuid)
            .ok_or(StoreError::NotFound)?;
        self.write_user_slot(row.slot, user)?;
        debug!(" Updated user {} in slot {}", user.uuid, row.slot);
        Ok(())
    }

    pub fn remove_user(&mut self, uuid: u16) -> Result<(), StoreError> {
        let mut table = self.user_table()?;
        let position = table
            .iter()
            .position(|row| row.uuid == uuid)
            .ok_or(StoreError::NotFound)?;
        let row = table.remove(position);

        self.write_user_table(&table)?;
        self.commit_count(Area::UserCount, table.len())?;

        debug!(" Removed user {} from slot {}", uuid, row.slot);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Credentials
    // ---------------------------------------------------------------------

    pub fn credential(
        &mut self,
        kind: CredentialType,
        slot: u16,
    ) -> Result<Credential, StoreError> {
        let table = self.credential_table()?;
        let row = table
            .iter()
            .find(|row| row.key() == (kind, slot))
            .ok_or(StoreError::NotFound)?;
        self.read_credential_slot(row)
    }

    /// Key (including owner) bound to `(kind, slot)`, if any.
    pub fn find_credential(
        &mut self,
        kind: CredentialType,
        slot: u16,
    ) -> Result<Option<CredentialId>, StoreError> {
        Ok(self
            .credential_table()?
            .iter()
            .find(|row| row.key() == (kind, slot))
            .map(|row| row.id))
    }

    /// First credential after `after` in `(type, slot)` order that matches
    /// the optional owner and type filters. `None` for `after` starts from
    /// the beginning.
    pub fn next_credential(
        &mut self,
        owner: Option<u16>,
        kind: Option<CredentialType>,
        after: Option<(CredentialType, u16)>,
    ) -> Result<Option<CredentialId>, StoreError> {
        Ok(self
            .credential_table()?
            .iter()
            .filter(|row| after.is_none_or(|after| row.key() > after))
            .find(|row| {
                owner.is_none_or(|uuid| row.id.uuid == uuid)
                    && kind.is_none_or(|kind| row.id.kind == kind)
            })
            .map(|row| row.id))
    }

    /// Owner 0 and slot 0 are never valid keys.
    pub fn insert_credential(&mut self, credential: &Credential) -> Result<(), StoreError> {
        let id = *credential.id();
        if id.uuid == 0 || id.slot == 0 {
            return Err(StoreError::Generic);
        }
        let mut table = self.credential_table()?;
        let position = table.partition_point(|row| row.key() < id.order_key());
        if table
            .get(position)
            .is_some_and(|row| row.key() == id.order_key())
        {
            return Err(StoreError::Occupied);
        }
        if table.len() >= self.layout.max_credentials as usize {
            return Err(StoreError::Full);
        }

        let storage_slot = self
            .credential_slots
            .allocate(|slot| table.iter().any(|row| row.storage_slot == slot))
            .ok_or(StoreError::Full)?;
        self.write_credential_slot(storage_slot, credential)?;

        table.insert(position, CredentialDescriptor { id, storage_slot });
        self.write_credential_table(&table)?;
        self.commit_count(Area::CredentialCount, table.len())?;

        debug!(
            " Inserted credential {:?}/{} of user {} into slot {}",
            id.kind, id.slot, id.uuid, storage_slot
        );
        Ok(())
    }

    /// Overwrites the record bound to the credential's key. The owner must
    /// match the stored owner.
    pub fn update_credential(&mut self, credential: &Credential) -> Result<(), StoreError> {
        let id = *credential.id();
        let table = self.credential_table()?;
        let row = table
            .iter()
            .find(|row| row.id == id)
            .ok_or(StoreError::NotFound)?;
        self.write_credential_slot(row.storage_slot, credential)?;
        debug!(
            " Updated credential {:?}/{} in slot {}",
            id.kind, id.slot, row.storage_slot
        );
        Ok(())
    }

    pub fn remove_credential(&mut self, kind: CredentialType, slot: u16) -> Result<(), StoreError> {
        let mut table = self.credential_table()?;
        let position = table
            .iter()
            .position(|row| row.key() == (kind, slot))
            .ok_or(StoreError::NotFound)?;
        let row = table.remove(position);

        self.write_credential_table(&table)?;
        self.commit_count(Area::CredentialCount, table.len())?;

        debug!(
            " Removed credential {:?}/{} from slot {}",
            kind, slot, row.storage_slot
        );
        Ok(())
    }

    /// Binds the record currently at `from` to `to` without touching the
    /// record bytes. Both keys must have the same type.
    pub fn rebind_credential(
        &mut self,
        from: &CredentialId,
        to: &CredentialId,
    ) -> Result<(), StoreError> {
        if from.kind != to.kind || to.uuid == 0 || to.slot == 0 {
            return Err(StoreError::Generic);
        }

        let mut table = self.credential_table()?;
        let source = table
            .iter()
            .position(|row| row.id == *from)
            .ok_or(StoreError::NotFound)?;
        if from.order_key() != to.order_key()
            && table.iter().any(|row| row.key() == to.order_key())
        {
            return Err(StoreError::Occupied);
        }

        let mut row = table.remove(source);
        row.id = *to;
        let position = table.partition_point(|other| other.key() < row.key());
        table.insert(position, row);
        self.write_credential_table(&table)?;

        debug!(
            " Moved credential {:?}/{} of user {} to slot {} of user {}",
            from.kind, from.slot, from.uuid, to.slot, to.uuid
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Admin code
    // ---------------------------------------------------------------------

    /// The stored admin code; empty when none is set.
    pub fn admin_code(&mut self) -> Result<CredentialData, StoreError> {
        let mut bytes = [0u8; 1 + MAX_CREDENTIAL_BYTES];
        self.read(Area::AdminCode, 0, &mut bytes)?;
        let len = bytes[0] as usize;
        if len > MAX_CREDENTIAL_BYTES {
            return Err(StoreError::Generic);
        }
        CredentialData::from_slice(&bytes[1..1 + len]).map_err(|_| StoreError::Generic)
    }

    pub fn write_admin_code(&mut self, code: &[u8]) -> Result<(), StoreError> {
        if code.len() > MAX_CREDENTIAL_BYTES {
            return Err(StoreError::Generic);
        }
        let mut bytes = [0u8; 1 + MAX_CREDENTIAL_BYTES];
        bytes[0] = code.len() as u8;
        bytes[1..1 + code.len()].copy_from_slice(code);
        self.write(Area::AdminCode, 0, &bytes[..1 + code.len()])
    }

    // ---------------------------------------------------------------------
    // Tables and slots
    // ---------------------------------------------------------------------

    fn user_table(&mut self) -> Result<Vec<UserDescriptor>, StoreError> {
        let mut bytes = alloc::vec![0u8; self.user_count as usize * UserDescriptor::SIZE];
        self.read(Area::UserDescriptors, 0, &mut bytes)?;
        Ok(bytes
            .chunks_exact(UserDescriptor::SIZE)
            .map(|chunk| {
                let mut row = [0u8; UserDescriptor::SIZE];
                row.copy_from_slice(chunk);
                UserDescriptor::from_bytes(&row)
            })
            .collect())
    }

    fn write_user_table(&mut self, table: &[UserDescriptor]) -> Result<(), StoreError> {
        let bytes: Vec<u8> = table.iter().flat_map(|row| row.to_bytes()).collect();
        self.write(Area::UserDescriptors, 0, &bytes)
    }

    fn credential_table(&mut self) -> Result<Vec<CredentialDescriptor>, StoreError> {
        let mut bytes =
            alloc::vec![0u8; self.credential_count as usize * CredentialDescriptor::SIZE];
        self.read(Area::CredentialDescriptors, 0, &mut bytes)?;
        bytes
            .chunks_exact(CredentialDescriptor::SIZE)
            .map(|chunk| {
                let mut row = [0u8; CredentialDescriptor::SIZE];
                row.copy_from_slice(chunk);
                CredentialDescriptor::from_bytes(&row).ok_or_else(|| {
                    error!(" Corrupt credential descriptor row: {:?}", row);
                    StoreError::Generic
                })
            })
            .collect()
    }

    fn write_credential_table(&mut self, table: &[CredentialDescriptor]) -> Result<(), StoreError> {
        let bytes: Vec<u8> = table.iter().flat_map(|row| row.to_bytes()).collect();
        self.write(Area::CredentialDescriptors, 0, &bytes)
    }

    fn read_user_slot(&mut self, uuid: u16, slot: u16) -> Result<User, StoreError> {
        let mut bytes = [0u8; USER_RECORD_SIZE];
        self.read(Area::UserRecords, slot as usize * USER_RECORD_SIZE, &mut bytes)?;
        let record: UserRecord = decode_record(&bytes)?;

        let name_len = record.name_len as usize;
        if name_len > self.layout.name_stride {
            return Err(StoreError::Generic);
        }
        let mut name = UserName::new();
        name.resize(name_len, 0).map_err(|_| StoreError::Generic)?;
        self.read(
            Area::UserNames,
            slot as usize * self.layout.name_stride,
            &mut name[..],
        )?;

        Ok(User {
            uuid,
            kind: record.kind,
            active: record.active,
            expiring_timeout_minutes: record.expiring_timeout_minutes,
            credential_rule: record.credential_rule,
            name_encoding: record.name_encoding,
            modifier: record.modifier,
            name,
        })
    }

    fn write_user_slot(&mut self, slot: u16, user: &User) -> Result<(), StoreError> {
        if user.name.len() > self.layout.name_stride {
            return Err(StoreError::Generic);
        }

        let record = UserRecord {
            kind: user.kind,
            active: user.active,
            expiring_timeout_minutes: user.expiring_timeout_minutes,
            credential_rule: user.credential_rule,
            name_encoding: user.name_encoding,
            modifier: user.modifier,
            name_len: user.name.len() as u8,
        };
        let bytes: [u8; USER_RECORD_SIZE] = encode_record(&record)?;
        self.write(Area::UserRecords, slot as usize * USER_RECORD_SIZE, &bytes)?;
        if !user.name.is_empty() {
            self.write(
                Area::UserNames,
                slot as usize * self.layout.name_stride,
                &user.name,
            )?;
        }
        Ok(())
    }

    fn read_credential_slot(&mut self, row: &CredentialDescriptor) -> Result<Credential, StoreError> {
        let slot = row.storage_slot as usize;
        let mut bytes = [0u8; CREDENTIAL_RECORD_SIZE];
        self.read(Area::CredentialRecords, slot * CREDENTIAL_RECORD_SIZE, &mut bytes)?;
        let record: CredentialRecord = decode_record(&bytes)?;

        let length = record.length as usize;
        if length > self.layout.data_stride {
            return Err(StoreError::Generic);
        }
        let mut data = CredentialData::new();
        data.resize(length, 0).map_err(|_| StoreError::Generic)?;
        self.read(
            Area::CredentialData,
            slot * self.layout.data_stride,
            &mut data[..],
        )?;

        Ok(Credential {
            metadata: CredentialMetadata {
                id: row.id,
                length: record.length,
                modifier: record.modifier,
            },
            data,
        })
    }

    fn write_credential_slot(
        &mut self,
        slot: u16,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        if credential.data.len() > self.layout.data_stride {
            return Err(StoreError::Generic);
        }

        let record = CredentialRecord {
            length: credential.data.len() as u8,
            modifier: credential.metadata.modifier,
        };
        let bytes: [u8; CREDENTIAL_RECORD_SIZE] = encode_record(&record)?;
        let slot = slot as usize;
        self.write(Area::CredentialRecords, slot * CREDENTIAL_RECORD_SIZE, &bytes)?;
        self.write(
            Area::CredentialData,
            slot * self.layout.data_stride,
            &credential.data,
        )
    }

    // ---------------------------------------------------------------------
    // Counts and raw access
    // ---------------------------------------------------------------------

    fn read_count(&mut self, area: Area) -> Result<u16, StoreError> {
        let mut bytes = [0u8; COUNT_SIZE];
        self.read(area, 0, &mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn write_count(&mut self, area: Area, count: u16) -> Result<(), StoreError> {
        self.write(area, 0, &count.to_le_bytes())
    }

    /// Persists a new count and only then adopts it in RAM, so a failed
    /// write leaves the previous count in effect.
    ///
    /// The descriptor table has already been rewritten at that point, so the
    /// old count now frames the new table:
    /// - after a failed insert the table holds one extra row that the count
    ///   cuts off, which hides the highest existing key, not the new one,
    ///   whenever the new key sorts before it;
    /// - after a failed remove the count still covers the vacated last row,
    ///   so the stale copy of that row is read back as a duplicate entry.
    ///
    /// Neither state is repaired automatically.
    fn commit_count(&mut self, area: Area, len: usize) -> Result<(), StoreError> {
        let count = len as u16;
        self.write_count(area, count)?;
        match area {
            Area::UserCount => self.user_count = count,
            Area::CredentialCount => self.credential_count = count,
            _ => return Err(StoreError::Generic),
        }
        Ok(())
    }

    fn read(&mut self, area: Area, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.nvm.read(area, offset, buf).map_err(|e| {
            error!(" NVM read of {:?} at {} failed: {:?}", area, offset, e);
            StoreError::Io
        })
    }

    fn write(&mut self, area: Area, offset: usize, data: &[u8]) -> Result<(), StoreError> {
        if data.is_empty() {
            return Ok(());
        }
        self.nvm.write(area, offset, data).map_err(|e| {
            error!(" NVM write of {:?} at {} failed: {:?}", area, offset, e);
            StoreError::Io
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{Modifier, NameEncoding};

    /// Memory storage that fails every write to one area.
    struct FaultyStorage {
        inner: MemoryStorage,
        failing: Option<Area>,
    }

    impl NvmStorage for FaultyStorage {
        type Error = ();

        fn read(&mut self, area: Area, offset: usize, buf: &mut [u8]) -> Result<(), ()> {
            self.inner.read(area, offset, buf).map_err(|_| ())
        }

        fn write(&mut self, area: Area, offset: usize, data: &[u8]) -> Result<(), ()> {
            if self.failing == Some(area) {
                return Err(());
            }
            self.inner.write(area, offset, data).map_err(|_| ())
        }
    }

    fn layout(max_users: u16, max_credentials: u16) -> StoreLayout {
        StoreLayout {
            max_users,
            max_credentials,
            name_stride: 16,
            data_stride: 16,
        }
    }

    fn store(max_users: u16, max_credentials: u16) -> Store<MemoryStorage> {
        Store::open(MemoryStorage::new(), layout(max_users, max_credentials)).unwrap()
    }

    fn named_user(uuid: u16, name: &str) -> User {
        User::new(uuid)
            .with_name(NameEncoding::Ascii, name.as_bytes())
            .unwrap()
    }

    fn pin(uuid: u16, slot: u16, digits: &[u8]) -> Credential {
        Credential::new(
            CredentialId::new(uuid, CredentialType::PinCode, slot),
            Modifier::local(),
            digits,
        )
        .unwrap()
    }

    fn users_in_order<S: NvmStorage>(store: &mut Store<S>) -> Vec<u16> {
        let mut uuids = Vec::new();
        let mut cursor = 0;
        while let Some(uuid) = store.next_user(cursor).unwrap() {
            uuids.push(uuid);
            cursor = uuid;
        }
        uuids
    }

    #[test]
    fn test_user_roundtrip() {
        let mut store = store(4, 4);
        let mut user = named_user(7, "Alice");
        user.modifier = Modifier::protocol(3);

        store.insert_user(&user).unwrap();
        assert_eq!(store.user(7).unwrap(), user);
        assert_eq!(store.user_count(), 1);
        assert_eq!(store.user(8), Err(StoreError::NotFound));
    }

    #[test]
    fn test_users_iterate_in_uuid_order() {
        let mut store = store(8, 4);
        for uuid in [5, 1, 3, 8, 2] {
            store.insert_user(&User::new(uuid)).unwrap();
        }
        store.remove_user(3).unwrap();
        assert_eq!(users_in_order(&mut store), [1, 2, 5, 8]);
    }

    #[test]
    fn test_duplicate_user_is_occupied() {
        let mut store = store(4, 4);
        store.insert_user(&User::new(1)).unwrap();
        assert_eq!(store.insert_user(&User::new(1)), Err(StoreError::Occupied));
    }

    #[test]
    fn test_user_capacity_and_reuse() {
        let mut store = store(2, 4);
        store.insert_user(&User::new(1)).unwrap();
        store.insert_user(&User::new(2)).unwrap();
        assert_eq!(store.insert_user(&User::new(3)), Err(StoreError::Full));

        store.remove_user(1).unwrap();
        store.insert_user(&named_user(3, "Carol")).unwrap();
        assert_eq!(users_in_order(&mut store), [2, 3]);
        assert_eq!(store.user(3).unwrap().name.as_slice(), b"Carol");
    }

    #[test]
    fn test_update_user_keeps_slot() {
        let mut store = store(4, 4);
        store.insert_user(&named_user(1, "Before")).unwrap();
        store.update_user(&named_user(1, "After")).unwrap();
        assert_eq!(store.user(1).unwrap().name.as_slice(), b"After");
        assert_eq!(store.update_user(&User::new(2)), Err(StoreError::NotFound));
    }

    #[test]
    fn test_credential_roundtrip_and_global_uniqueness() {
        let mut store = store(4, 4);
        let credential = pin(5, 1, &[1, 2, 3, 4]);
        store.insert_credential(&credential).unwrap();
        assert_eq!(
            store.credential(CredentialType::PinCode, 1).unwrap(),
            credential
        );

        assert_eq!(
            store.insert_credential(&pin(9, 1, &[5, 6, 7, 8])),
            Err(StoreError::Occupied)
        );
        assert_eq!(store.credential_count(), 1);
    }

    #[test]
    fn test_credentials_ordered_by_type_then_slot() {
        let mut store = store(4, 8);
        let rfid = Credential::new(
            CredentialId::new(2, CredentialType::RfidCode, 1),
            Modifier::local(),
            &[9; 4],
        )
        .unwrap();
        store.insert_credential(&rfid).unwrap();
        store.insert_credential(&pin(1, 4, b"4444")).unwrap();
        store.insert_credential(&pin(2, 2, b"2222")).unwrap();

        let mut keys = Vec::new();
        let mut cursor = None;
        while let Some(id) = store.next_credential(None, None, cursor).unwrap() {
            keys.push(id.order_key());
            cursor = Some(id.order_key());
        }
        assert_eq!(
            keys,
            [
                (CredentialType::PinCode, 2),
                (CredentialType::PinCode, 4),
                (CredentialType::RfidCode, 1)
            ]
        );

        let owned_by_2 = store.next_credential(Some(2), None, None).unwrap().unwrap();
        assert_eq!(owned_by_2.slot, 2);
        let rfid_of_2 = store
            .next_credential(Some(2), Some(CredentialType::RfidCode), None)
            .unwrap();
        assert_eq!(rfid_of_2, Some(rfid.metadata.id));
    }

    #[test]
    fn test_credential_capacity() {
        let mut store = store(4, 2);
        store.insert_credential(&pin(1, 1, b"1111")).unwrap();
        store.insert_credential(&pin(1, 2, b"2222")).unwrap();
        assert_eq!(
            store.insert_credential(&pin(1, 3, b"3333")),
            Err(StoreError::Full)
        );
        store.remove_credential(CredentialType::PinCode, 1).unwrap();
        store.insert_credential(&pin(1, 3, b"3333")).unwrap();
        assert_eq!(
            store.credential(CredentialType::PinCode, 3).unwrap().data.as_slice(),
            b"3333"
        );
    }

    #[test]
    fn test_update_credential_requires_same_owner() {
        let mut store = store(4, 4);
        store.insert_credential(&pin(1, 1, b"1111")).unwrap();
        assert_eq!(
            store.update_credential(&pin(2, 1, b"2222")),
            Err(StoreError::NotFound)
        );
        store.update_credential(&pin(1, 1, b"9999")).unwrap();
        assert_eq!(
            store.credential(CredentialType::PinCode, 1).unwrap().data.as_slice(),
            b"9999"
        );
    }

    #[test]
    fn test_rebind_credential() {
        let mut store = store(4, 4);
        store.insert_credential(&pin(1, 1, b"1111")).unwrap();
        store.insert_credential(&pin(1, 2, b"2222")).unwrap();

        let from = CredentialId::new(1, CredentialType::PinCode, 1);
        assert_eq!(
            store.rebind_credential(&from, &CredentialId::new(2, CredentialType::PinCode, 2)),
            Err(StoreError::Occupied)
        );

        let to = CredentialId::new(2, CredentialType::PinCode, 5);
        store.rebind_credential(&from, &to).unwrap();
        let moved = store.credential(CredentialType::PinCode, 5).unwrap();
        assert_eq!(moved.metadata.id, to);
        assert_eq!(moved.data.as_slice(), b"1111");
        assert_eq!(
            store.rebind_credential(&from, &to),
            Err(StoreError::NotFound)
        );
        assert_eq!(store.credential_count(), 2);
    }

    #[test]
    fn test_failed_count_write_is_not_committed() {
        let nvm = FaultyStorage {
            inner: MemoryStorage::new(),
            failing: None,
        };
        let mut store = Store::open(nvm, layout(4, 4)).unwrap();
        store.insert_user(&User::new(1)).unwrap();

        store.storage_mut().failing = Some(Area::UserCount);
        assert_eq!(store.insert_user(&User::new(2)), Err(StoreError::Io));
        assert_eq!(store.user_count(), 1);
        assert_eq!(users_in_order(&mut store), [1]);

        store.storage_mut().failing = None;
        store.insert_user(&User::new(2)).unwrap();
        store.storage_mut().failing = Some(Area::UserDescriptors);
        assert_eq!(store.remove_user(1), Err(StoreError::Io));
        assert_eq!(store.user_count(), 2);
        assert_eq!(users_in_order(&mut store), [1, 2]);

        store.storage_mut().failing = Some(Area::UserCount);
        assert_eq!(store.remove_user(1), Err(StoreError::Io));
        assert_eq!(store.user_count(), 2);
    }

    #[test]
    fn test_zero_keys_are_rejected() {
        let mut store = store(4, 4);
        assert_eq!(store.insert_user(&User::new(0)), Err(StoreError::Generic));
        assert_eq!(store.user_count(), 0);
        assert_eq!(store.next_user(0).unwrap(), None);

        assert_eq!(
            store.insert_credential(&pin(0, 1, b"1111")),
            Err(StoreError::Generic)
        );
        assert_eq!(
            store.insert_credential(&pin(1, 0, b"1111")),
            Err(StoreError::Generic)
        );
        assert_eq!(store.credential_count(), 0);

        store.insert_credential(&pin(1, 1, b"1111")).unwrap();
        let from = CredentialId::new(1, CredentialType::PinCode, 1);
        assert_eq!(
            store.rebind_credential(&from, &CredentialId::new(1, CredentialType::PinCode, 0)),
            Err(StoreError::Generic)
        );
        assert_eq!(
            store.rebind_credential(&from, &CredentialId::new(0, CredentialType::PinCode, 1)),
            Err(StoreError::Generic)
        );
    }

    #[test]
    fn test_reopen_restores_contents() {
        let mut store = store(4, 4);
        store.insert_user(&named_user(2, "Bob")).unwrap();
        store.insert_credential(&pin(2, 1, b"2580")).unwrap();
        store.write_admin_code(b"0000").unwrap();

        let mut reopened = Store::open(store.into_storage(), layout(4, 4)).unwrap();
        assert_eq!(reopened.user(2).unwrap().name.as_slice(), b"Bob");
        assert_eq!(
            reopened
                .credential(CredentialType::PinCode, 1)
                .unwrap()
                .data
                .as_slice(),
            b"2580"
        );
        assert_eq!(reopened.admin_code().unwrap().as_slice(), b"0000");
    }

    #[test]
    fn test_open_rejects_count_beyond_capacity() {
        let mut nvm = MemoryStorage::new();
        nvm.write(Area::UserCount, 0, &5u16.to_le_bytes()).unwrap();
        assert_eq!(
            Store::open(nvm, layout(4, 4)).err(),
            Some(StoreError::Generic)
        );
    }

    #[test]
    fn test_format_forgets_everything() {
        let mut store = store(4, 4);
        store.insert_user(&User::new(1)).unwrap();
        store.insert_credential(&pin(1, 1, b"1111")).unwrap();
        store.format().unwrap();
        assert_eq!(store.next_user(0).unwrap(), None);
        assert_eq!(store.next_credential(None, None, None).unwrap(), None);
        store.insert_user(&User::new(1)).unwrap();
    }
}
