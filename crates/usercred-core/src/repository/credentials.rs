use log::info;

use super::Repository;
use crate::storage::{NvmStorage, StoreError};
use crate::types::{Credential, CredentialId, CredentialType};

impl<S: NvmStorage> Repository<S> {
    /// The credential bound to `(kind, slot)`, whoever owns it.
    pub fn credential(&mut self, kind: CredentialType, slot: u16) -> Result<Credential, StoreError> {
        self.store.credential(kind, slot)
    }

    /// The credential at `id`, which must belong to `id.uuid`.
    pub fn owned_credential(&mut self, id: &CredentialId) -> Result<Credential, StoreError> {
        let credential = self.store.credential(id.kind, id.slot)?;
        if credential.metadata.id.uuid != id.uuid {
            return Err(StoreError::NotFound);
        }
        Ok(credential)
    }

    /// Key bound to `(kind, slot)`, if any.
    pub fn find_credential(
        &mut self,
        kind: CredentialType,
        slot: u16,
    ) -> Result<Option<CredentialId>, StoreError> {
        self.store.find_credential(kind, slot)
    }

    /// Successor of `after` in `(type, slot)` order among the credentials
    /// matching the optional owner and type filters.
    pub fn next_credential(
        &mut self,
        owner: Option<u16>,
        kind: Option<CredentialType>,
        after: Option<(CredentialType, u16)>,
    ) -> Result<Option<CredentialId>, StoreError> {
        self.store.next_credential(owner, kind, after)
    }

    pub fn credential_count(&self) -> u16 {
        self.store.credential_count()
    }

    /// Number of credentials matching the filters.
    pub fn count_credentials(
        &mut self,
        owner: Option<u16>,
        kind: Option<CredentialType>,
    ) -> Result<u16, StoreError> {
        let mut count = 0;
        let mut cursor = None;
        while let Some(id) = self.store.next_credential(owner, kind, cursor)? {
            count += 1;
            cursor = Some(id.order_key());
        }
        Ok(count)
    }

    pub fn add_credential(&mut self, credential: &Credential) -> Result<(), StoreError> {
        self.store.insert_credential(credential)?;
        let id = credential.id();
        info!(
            " Added credential {:?}/{} for user {}",
            id.kind, id.slot, id.uuid
        );
        Ok(())
    }

    pub fn modify_credential(&mut self, credential: &Credential) -> Result<(), StoreError> {
        self.store.update_credential(credential)?;
        let id = credential.id();
        info!(
            " Modified credential {:?}/{} of user {}",
            id.kind, id.slot, id.uuid
        );
        Ok(())
    }

    pub fn delete_credential(&mut self, id: &CredentialId) -> Result<(), StoreError> {
        match self.store.find_credential(id.kind, id.slot)? {
            Some(bound) if bound.uuid == id.uuid => {
                self.store.remove_credential(id.kind, id.slot)?;
                info!(
                    " Deleted credential {:?}/{} of user {}",
                    id.kind, id.slot, id.uuid
                );
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    /// Deletes every credential matching the filters and returns how many
    /// were removed. `None` matches any owner or any type.
    pub fn delete_credentials(
        &mut self,
        owner: Option<u16>,
        kind: Option<CredentialType>,
    ) -> Result<u16, StoreError> {
        let mut removed = 0;
        let mut cursor = None;
        while let Some(id) = self.store.next_credential(owner, kind, cursor)? {
            self.store.remove_credential(id.kind, id.slot)?;
            removed += 1;
            cursor = Some(id.order_key());
        }

        if removed > 0 {
            info!(
                " Deleted {} credentials (owner {:?}, type {:?})",
                removed, owner, kind
            );
        }
        Ok(removed)
    }

    /// Re-associates a credential with another user and/or slot. The data
    /// stays where it is.
    ///
    /// Both users must exist; callers check that before moving.
    pub fn move_credential(
        &mut self,
        kind: CredentialType,
        source_uuid: u16,
        source_slot: u16,
        destination_uuid: u16,
        destination_slot: u16,
    ) -> Result<(), StoreError> {
        let from = CredentialId::new(source_uuid, kind, source_slot);
        let to = CredentialId::new(destination_uuid, kind, destination_slot);
        self.store.rebind_credential(&from, &to)?;
        info!(
            " Moved credential {:?}/{} from user {} to slot {} of user {}",
            kind, source_slot, source_uuid, destination_slot, destination_uuid
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::repository::Repository;
    use crate::storage::{MemoryStorage, StoreError};
    use crate::types::{Credential, CredentialId, CredentialType, Modifier};

    fn repository() -> Repository<MemoryStorage> {
        Repository::open(MemoryStorage::new(), Config::default()).unwrap()
    }

    fn credential(uuid: u16, kind: CredentialType, slot: u16, data: &[u8]) -> Credential {
        Credential::new(CredentialId::new(uuid, kind, slot), Modifier::local(), data).unwrap()
    }

    fn seeded() -> Repository<MemoryStorage> {
        let mut repo = repository();
        repo.add_credential(&credential(1, CredentialType::PinCode, 1, b"1111"))
            .unwrap();
        repo.add_credential(&credential(1, CredentialType::RfidCode, 1, &[1; 4]))
            .unwrap();
        repo.add_credential(&credential(2, CredentialType::PinCode, 2, b"2222"))
            .unwrap();
        repo.add_credential(&credential(1, CredentialType::PinCode, 3, b"3333"))
            .unwrap();
        repo
    }

    #[test]
    fn test_owned_credential_checks_owner() {
        let mut repo = seeded();
        let id = CredentialId::new(2, CredentialType::PinCode, 1);
        assert_eq!(repo.owned_credential(&id), Err(StoreError::NotFound));
        assert_eq!(repo.delete_credential(&id), Err(StoreError::NotFound));
        assert_eq!(repo.credential_count(), 4);
    }

    #[test]
    fn test_count_credentials_with_filters() {
        let mut repo = seeded();
        assert_eq!(repo.count_credentials(None, None), Ok(4));
        assert_eq!(repo.count_credentials(Some(1), None), Ok(3));
        assert_eq!(
            repo.count_credentials(Some(1), Some(CredentialType::PinCode)),
            Ok(2)
        );
        assert_eq!(
            repo.count_credentials(None, Some(CredentialType::FingerBiometric)),
            Ok(0)
        );
    }

    #[test]
    fn test_delete_credentials_of_type_for_owner() {
        let mut repo = seeded();
        assert_eq!(
            repo.delete_credentials(Some(1), Some(CredentialType::PinCode)),
            Ok(2)
        );
        assert_eq!(repo.count_credentials(Some(1), None), Ok(1));
        assert_eq!(repo.count_credentials(Some(2), None), Ok(1));

        assert_eq!(repo.delete_credentials(None, None), Ok(2));
        assert_eq!(repo.credential_count(), 0);
    }

    #[test]
    fn test_move_credential() {
        let mut repo = seeded();
        assert_eq!(
            repo.move_credential(CredentialType::PinCode, 1, 1, 2, 2),
            Err(StoreError::Occupied)
        );
        assert_eq!(
            repo.move_credential(CredentialType::PinCode, 2, 1, 2, 5),
            Err(StoreError::NotFound)
        );

        repo.move_credential(CredentialType::PinCode, 1, 1, 2, 5)
            .unwrap();
        let moved = repo
            .owned_credential(&CredentialId::new(2, CredentialType::PinCode, 5))
            .unwrap();
        assert_eq!(moved.data.as_slice(), b"1111");
        assert_eq!(repo.find_credential(CredentialType::PinCode, 1), Ok(None));
    }

    #[test]
    fn test_move_to_same_slot_changes_owner() {
        let mut repo = seeded();
        repo.move_credential(CredentialType::RfidCode, 1, 1, 2, 1)
            .unwrap();
        assert_eq!(
            repo.find_credential(CredentialType::RfidCode, 1),
            Ok(Some(CredentialId::new(2, CredentialType::RfidCode, 1)))
        );
    }
}
