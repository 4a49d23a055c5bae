//! Repository functions over `rusqlite::Connection`.
//!
//! One module per logical repository. Functions take a `&Connection` (or a
//! transaction deref) so the engine decides transaction boundaries.

pub mod banks;
pub mod questions;
pub mod relationships;
pub mod security_events;
pub mod taxonomy;
