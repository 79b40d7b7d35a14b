//! Domain models for the koereq request core.

mod request;
mod sync;

pub use request::*;
pub use sync::*;
