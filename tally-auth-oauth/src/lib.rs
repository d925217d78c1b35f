pub mod callback;
pub mod service;

#[cfg(feature = "oauth2-client")]
pub mod oauth2_client;

pub use callback::*;
pub use service::*;

#[cfg(feature = "oauth2-client")]
pub use oauth2_client::*;
