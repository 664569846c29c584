//! Authentication flow contexts
//!
//! Flow steps share state through a versioned [`AuthenticationFlowContext`].
//! [`ContextLoader`] reads it back without ever observing an older version
//! than the caller wrote, retrying while the store catches up.

mod loader;
mod model;

pub use loader::{ConsumedContext, ContextLoader};
pub use model::AuthenticationFlowContext;
