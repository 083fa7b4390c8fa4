//! Shared request-level types.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Priority`] | Caller-assigned priority tier for requests and cache entries |

mod priority;

pub use priority::Priority;
