//! Static capabilities of the User Credential subsystem.
//!
//! A [`Config`] is fixed for the lifetime of a [`crate::service::UserCredentialService`].
//! It can be built in code or provisioned as a postcard blob.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::types::{
    CredentialRule, CredentialType, MAX_CREDENTIAL_BYTES, MAX_USER_NAME_BYTES, UserType,
};

/// Capabilities of one credential type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CredentialTypeConfig {
    pub supported: bool,
    /// Highest usable slot number; slots start at 1.
    pub max_slots: u16,
    pub min_length: u8,
    pub max_length: u8,
    pub learn_supported: bool,
    /// Per-step timeout used when a learn request asks for 0 seconds.
    pub learn_recommended_timeout_s: u8,
    pub learn_steps: u8,
}

impl CredentialTypeConfig {
    pub const fn unsupported() -> Self {
        Self {
            supported: false,
            max_slots: 0,
            min_length: 0,
            max_length: 0,
            learn_supported: false,
            learn_recommended_timeout_s: 0,
            learn_steps: 0,
        }
    }

    pub const fn new(max_slots: u16, min_length: u8, max_length: u8) -> Self {
        Self {
            supported: true,
            max_slots,
            min_length,
            max_length,
            learn_supported: false,
            learn_recommended_timeout_s: 0,
            learn_steps: 0,
        }
    }

    pub const fn with_learn(mut self, recommended_timeout_s: u8, steps: u8) -> Self {
        self.learn_supported = true;
        self.learn_recommended_timeout_s = recommended_timeout_s;
        self.learn_steps = steps;
        self
    }
}

/// Which checksum queries the device answers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumSupport {
    pub all_users: bool,
    pub user: bool,
    pub credential_type: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_users: u16,
    /// Total credentials across all users and types.
    pub max_credentials: u16,
    pub max_user_name_len: u8,
    /// Bit set of supported [`UserType`]s, see [`UserType::mask`].
    pub supported_user_types: u16,
    /// Bit set of supported [`CredentialRule`]s, see [`CredentialRule::mask`].
    pub supported_credential_rules: u8,
    pub credential_types: [CredentialTypeConfig; CredentialType::COUNT],
    pub checksums: ChecksumSupport,
    pub admin_code_supported: bool,
    pub admin_code_deactivation_supported: bool,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_users must be between 1 and {0}")]
    UserCapacity(u16),
    #[error("max_credentials must be at least 1")]
    CredentialCapacity,
    #[error("user names are limited to {0} bytes")]
    NameLength(usize),
    #[error("credential payloads are limited to {0} bytes")]
    CredentialLength(usize),
    #[error("credential length bounds are inverted or zero")]
    CredentialBounds,
    #[error("learn is enabled for a type without steps or a timeout")]
    LearnParameters,
    #[error("general users must be supported")]
    UserTypes,
    #[error("the single credential rule must be supported")]
    CredentialRules,
    #[error("invalid configuration blob")]
    Decode,
}

impl Config {
    /// Decodes a provisioning blob and validates it.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Descriptor rows address slots with a u16 and 0 is reserved.
        if self.max_users == 0 || self.max_users == u16::MAX {
            return Err(ConfigError::UserCapacity(u16::MAX - 1));
        }
        if self.max_credentials == 0 {
            return Err(ConfigError::CredentialCapacity);
        }
        if self.max_user_name_len as usize > MAX_USER_NAME_BYTES {
            return Err(ConfigError::NameLength(MAX_USER_NAME_BYTES));
        }
        if !self.supports_user_type(UserType::General) {
            return Err(ConfigError::UserTypes);
        }
        if !self.supports_credential_rule(CredentialRule::Single) {
            return Err(ConfigError::CredentialRules);
        }

        for kind in CredentialType::ALL {
            let cfg = self.credential_type(kind);
            if !cfg.supported {
                continue;
            }
            if cfg.max_length as usize > MAX_CREDENTIAL_BYTES {
                return Err(ConfigError::CredentialLength(MAX_CREDENTIAL_BYTES));
            }
            if cfg.min_length == 0 || cfg.min_length > cfg.max_length || cfg.max_slots == 0 {
                return Err(ConfigError::CredentialBounds);
            }
            if cfg.learn_supported && (cfg.learn_steps == 0 || cfg.learn_recommended_timeout_s == 0)
            {
                return Err(ConfigError::LearnParameters);
            }
        }

        Ok(())
    }

    pub fn credential_type(&self, kind: CredentialType) -> &CredentialTypeConfig {
        &self.credential_types[kind.index()]
    }

    pub fn supports_credential_type(&self, kind: CredentialType) -> bool {
        self.credential_type(kind).supported
    }

    pub fn supports_user_type(&self, kind: UserType) -> bool {
        self.supported_user_types & kind.mask() != 0
    }

    pub fn supports_credential_rule(&self, rule: CredentialRule) -> bool {
        self.supported_credential_rules & rule.mask() != 0
    }

    /// Stride of one credential payload in persistent storage.
    pub fn credential_data_stride(&self) -> usize {
        self.credential_types
            .iter()
            .filter(|cfg| cfg.supported)
            .map(|cfg| cfg.max_length as usize)
            .max()
            .unwrap_or(0)
    }

    /// Bit set of supported credential types, bit `n` for type value `n`.
    pub fn supported_credential_types(&self) -> u16 {
        CredentialType::ALL
            .into_iter()
            .filter(|kind| self.supports_credential_type(*kind))
            .fold(0, |mask, kind| mask | (1 << kind.to_u8()))
    }
}

impl Default for Config {
    /// A small keypad lock: PIN codes with local learn, RFID tags and
    /// fingerprints.
    fn default() -> Self {
        let mut credential_types = [CredentialTypeConfig::unsupported(); CredentialType::COUNT];
        credential_types[CredentialType::PinCode.index()] =
            CredentialTypeConfig::new(20, 4, 10).with_learn(30, 1);
        credential_types[CredentialType::RfidCode.index()] =
            CredentialTypeConfig::new(10, 4, 16).with_learn(15, 1);
        credential_types[CredentialType::FingerBiometric.index()] =
            CredentialTypeConfig::new(10, 16, 64).with_learn(10, 3);

        Self {
            max_users: 20,
            max_credentials: 40,
            max_user_name_len: 16,
            supported_user_types: UserType::ALL
                .into_iter()
                .fold(0, |mask, kind| mask | kind.mask()),
            supported_credential_rules: CredentialRule::Single.mask() | CredentialRule::Dual.mask(),
            credential_types,
            checksums: ChecksumSupport {
                all_users: true,
                user: true,
                credential_type: true,
            },
            admin_code_supported: true,
            admin_code_deactivation_supported: true,
        }
    }
}
