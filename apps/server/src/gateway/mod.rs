pub mod entitlements;
pub mod fanout;
pub mod sse;
pub mod state;
