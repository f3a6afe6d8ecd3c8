pub mod config;
pub mod engine;
pub mod filter;
pub mod journal;
pub mod pass;
pub mod reconciler;
pub mod recording;
pub mod report;
pub mod synchronizer;

pub use config::*;
pub use engine::*;
pub use filter::*;
pub use journal::*;
pub use pass::*;
pub use reconciler::*;
pub use recording::*;
pub use report::*;
pub use synchronizer::*;
