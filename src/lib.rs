pub mod backends;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod git;
pub mod logging;
pub mod managers;
pub mod recovery;
pub mod store;
pub mod timeline;

pub use error::{Error, Result};
