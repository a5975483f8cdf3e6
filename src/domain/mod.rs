//! Domain models for the receipt store
//!
//! Receipt documents, sequence keys and query filters.

mod sequence;
mod types;

pub use sequence::*;
pub use types::*;
