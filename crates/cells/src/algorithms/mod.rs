pub mod preprocessing;
pub mod segmentation;
pub mod features;
pub mod templates;
pub mod boundaries;

pub use preprocessing::*;
pub use segmentation::*;
pub use features::*;
pub use templates::*;
pub use boundaries::*;
