//! tally-http: the request layer of the Tally admin client.
//!
//! [`RequestCoordinator`] collapses identical in-flight calls, attaches the
//! bearer token held in the [`tally_core::TokenStore`] and turns every
//! response into a [`tally_core::ClientResult`]. [`BackendApi`] names the
//! endpoints the session and tenant crates consume.

pub mod api;
pub mod coordinator;
pub mod options;
pub mod scripted;
pub mod transport;
pub mod wire;

pub use api::BackendApi;
pub use coordinator::{error_message, interpret, RequestCoordinator, RequestDescriptor, Response};
pub use options::{RequestOptions, RequestOptionsBuilder};
pub use scripted::{Gate, Scripted, ScriptedTransport};
pub use transport::{OutboundRequest, RawResponse, ReqwestTransport, Transport};
