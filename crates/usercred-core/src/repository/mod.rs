//! User and credential repositories.
//!
//! A thin layer over [`Store`] that applies the domain defaults (user names,
//! expiring timeouts) and the multi-record operations (bulk deletes, credential
//! moves). The repository owns no state besides the store and configuration.

mod credentials;
mod users;

pub use users::default_user_name;

use crate::config::Config;
use crate::storage::{NvmStorage, Store, StoreError, StoreLayout};

pub struct Repository<S: NvmStorage> {
    store: Store<S>,
    config: Config,
}

impl<S: NvmStorage> Repository<S> {
    pub fn open(nvm: S, config: Config) -> Result<Self, StoreError> {
        let store = Store::open(nvm, StoreLayout::from_config(&config))?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<S> {
        &mut self.store
    }

    pub fn into_storage(self) -> S {
        self.store.into_storage()
    }
}
