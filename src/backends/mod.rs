pub mod command;
pub mod traits;

pub use command::*;
pub use traits::*;
