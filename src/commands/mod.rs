//! CLI commands implementation

pub mod init;
pub mod process;
pub mod report;
pub mod sources;

pub use init::*;
pub use process::*;
pub use report::*;
pub use sources::*;
