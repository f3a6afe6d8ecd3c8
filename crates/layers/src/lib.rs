pub mod definition;
pub mod desired;
pub mod layer;
pub mod symbology;
pub mod tracker;
pub mod visibility;

pub use definition::*;
pub use desired::*;
pub use layer::*;
pub use symbology::*;
pub use tracker::*;
pub use visibility::*;
