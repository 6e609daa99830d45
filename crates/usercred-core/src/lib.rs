//! Hardware-independent core of the User Credential subsystem
//!
//! This crate holds everything that decides what a lock or access panel
//! knows about its users: the persistent user/credential store, the
//! repositories on top of it, credential validation and de-duplication,
//! CRC-16 checksums for remote sync, and the Credential Learn enrollment
//! state machine. [`service::UserCredentialService`] ties them together.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod checksum;
pub mod config;
pub mod error;
pub mod learn;
pub mod repository;
pub mod service;
pub mod storage;
pub mod types;
pub mod validation;

pub use config::Config;
pub use error::Error;
pub use service::UserCredentialService;
