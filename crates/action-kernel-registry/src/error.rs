use action_kernel_storage::StorageError;
use thiserror::Error;

use crate::model::{ContractStatus, ContractType};

/// Errors raised by the contract registry and its stores
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No record matches the lookup
    #[error("Contract not found: {contract_type}/{name}{}", version_suffix(.version))]
    ContractNotFound {
        contract_type: ContractType,
        name: String,
        version: Option<u32>,
    },

    /// (id, version) already registered with different content
    #[error("Contract {name}@v{version} already registered")]
    DuplicateContract { name: String, version: u32 },

    /// Active and deprecated records only change status
    #[error("Contract {name}@v{version} is {status} and cannot be replaced")]
    ImmutableContract {
        name: String,
        version: u32,
        status: ContractStatus,
    },

    /// Malformed record or contract blob
    #[error("Contract invalid: {0}")]
    ContractInvalid(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ContractStatus,
        to: ContractStatus,
    },

    /// Backing store missing or failing
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl RegistryError {
    pub fn not_found(contract_type: ContractType, name: impl Into<String>, version: Option<u32>) -> Self {
        RegistryError::ContractNotFound {
            contract_type,
            name: name.into(),
            version,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        RegistryError::ContractInvalid(msg.into())
    }

    /// Write attempted without a backing store
    pub(crate) fn reduced_mode(operation: &str) -> Self {
        RegistryError::StorageUnavailable(format!("{} not supported in this mode", operation))
    }
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        RegistryError::StorageUnavailable(err.to_string())
    }
}

fn version_suffix(version: &Option<u32>) -> String {
    version.map(|v| format!("@v{}", v)).unwrap_or_default()
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = RegistryError::not_found(ContractType::Action, "acct.create.entry", Some(2));
        assert_eq!(err.to_string(), "Contract not found: action/acct.create.entry@v2");

        let err = RegistryError::not_found(ContractType::Entity, "ledger", None);
        assert_eq!(err.to_string(), "Contract not found: entity/ledger");
    }

    #[test]
    fn test_storage_error_maps_to_unavailable() {
        let err: RegistryError = StorageError::unavailable("pool exhausted").into();
        assert!(matches!(err, RegistryError::StorageUnavailable(_)));
        assert!(err.to_string().contains("pool exhausted"));
    }

    #[test]
    fn test_reduced_mode_message() {
        let err = RegistryError::reduced_mode("register");
        assert_eq!(err.to_string(), "Storage unavailable: register not supported in this mode");
    }
}
