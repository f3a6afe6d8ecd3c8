pub mod events;
pub mod readiness;
pub mod retry;
pub mod settle;

pub use events::*;
pub use readiness::*;
pub use retry::*;
pub use settle::*;
