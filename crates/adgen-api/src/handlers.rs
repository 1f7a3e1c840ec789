//! Request handlers.

pub mod analysis;
pub mod generations;
pub mod health;

pub use analysis::*;
pub use generations::*;
pub use health::*;
