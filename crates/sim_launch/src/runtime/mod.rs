//! Runtime components: plan resolution, process management and sessions

pub mod process;
pub mod resolver;
pub mod session;
pub mod supervisor;

pub use process::*;
pub use resolver::*;
pub use session::*;
pub use supervisor::*;
