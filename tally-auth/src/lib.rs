//! tally-auth: who is signed in.
//!
//! [`SessionManager`] owns the identity lifecycle on top of a pluggable
//! [`IdentityProvider`]; [`GoTrueProvider`] is the Supabase auth
//! implementation.

pub mod gotrue;
pub mod options;
pub mod provider;
pub mod session;

pub use gotrue::GoTrueProvider;
pub use options::{GoTrueOptions, SessionOptions, SessionOptionsBuilder};
pub use provider::{Credentials, IdentityProvider, OAuthGrant};
pub use session::{AuthOutcome, SessionManager, SessionState};
