//! tally-tenant: which company the signed-in identity is working in.

pub mod context;
pub mod focus;
pub mod options;
pub mod preload;

pub use context::{SwitchOutcome, TenantContext, TenantSetLoad};
pub use focus::{FocusWatcher, Visibility};
pub use options::{TenantOptions, TenantOptionsBuilder};
pub use preload::{PreloadHandle, PreloadReport};
