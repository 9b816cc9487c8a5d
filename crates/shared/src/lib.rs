//! Tidepool shared library — typed ids, errors, API projections, and the
//! event codec shared between the API and gateway roles.

pub mod constants;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod time;
