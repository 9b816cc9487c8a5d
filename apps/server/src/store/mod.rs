//! Typed access to the record store.
//!
//! One module per collection: row structs derived with `sqlx::FromRow`,
//! explicit column lists, and atomic in-place counter updates where the
//! domain calls for them (`bytes`, invite `uses`).

pub mod channels;
pub mod emojis;
pub mod files;
pub mod invites;
pub mod members;
pub mod messages;
pub mod users;
pub mod webhooks;
