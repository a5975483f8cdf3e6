//! HTTP handlers organized by concern.

pub mod health;
pub mod receipts;
pub mod ws;

pub use health::*;
pub use receipts::*;
pub use ws::*;
