//! Contract registry for the action contract kernel
//!
//! Holds versioned action, entity and data contracts per tenant scope
//! (`None` = platform-global), the data contracts that classify what an
//! action touches, and the links between the two.
//!
//! # Example
//!
//! ```rust,no_run
//! use action_kernel_registry::{
//!     ActionContract, ActionKind, ContractRecord, ContractRegistry, ContractStatus,
//!     MemoryContractStore,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> action_kernel_registry::RegistryResult<()> {
//! let registry = ContractRegistry::new(Arc::new(MemoryContractStore::new()));
//!
//! let contract = ActionContract::new("acct.create.entry", 1, ActionKind::Command)
//!     .with_permissions(["data.write_financial"]);
//! let record = ContractRecord::from_action(Some("tenant-a"), &contract)?
//!     .with_status(ContractStatus::Active);
//! registry.register(record, false).await?;
//!
//! let active = registry.resolve_action(Some("tenant-a"), "acct.create.entry").await?;
//! assert_eq!(active.map(|c| c.version), Some(1));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod model;
pub mod registry;
pub mod sql;
pub mod store;

pub use error::{RegistryError, RegistryResult};
pub use model::{
    content_hash, AccessType, ActionContract, ActionDataContractLink, ActionKind, CachePolicy,
    CacheScope, ContractClassification, ContractRecord, ContractStatus, ContractType,
    DataClassification, DataContract, ExecutionMode, GovernanceTier, Idempotency, PiiLevel,
    RateLimit, RiskBand, Sensitivity, SideEffectLevel, TierRequirements,
};
pub use registry::{ContractRegistry, RegisterOutcome, DEFAULT_CACHE_TTL};
pub use sql::SqlContractStore;
pub use store::{ContractStore, MemoryContractStore};
