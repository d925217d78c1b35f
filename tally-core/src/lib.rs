//! tally-core: shared model and local state for the Tally admin client.
//!
//! Everything here is transport-agnostic: the identity and tenant model,
//! the two-tier token store, the per-tenant cache and the typed event hub
//! that the session and tenant-context crates build on.

pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod identity;
pub mod storage;
pub mod tenant;
pub mod token;

#[cfg(feature = "tracing-basic")]
pub mod telemetry;

pub use cache::{CacheEntry, TenantCache};
pub use config::{ClientConfig, ClientConfigSnapshot};
pub use errors::{is_deletion_indicator, ClientError, ClientResult, ErrorKind};
pub use events::{listener, EventHub, EventListener, ListenerId, SessionEvent, TenantChanged};
pub use identity::Identity;
pub use storage::{FileTier, KeyPolicy, MemoryTier, StorageTier, Tier, TokenStore, UnavailableTier};
pub use tenant::{BillingAddress, DataKind, Frequency, Role, Tenant, TenantId, TenantSet, TenantSummary};
pub use token::{remember_flag, PersistedToken};
