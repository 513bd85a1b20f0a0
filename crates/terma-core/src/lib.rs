pub mod error;
pub mod hub;
pub mod registry;
pub mod terminal;

pub use error::*;
pub use hub::*;
pub use registry::*;
pub use terminal::*;
