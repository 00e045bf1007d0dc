//! Launch descriptions, arguments and substitution

mod arguments;
mod description;
mod environment;
mod launch_file;
mod loader;
mod package;
mod substitution;

pub use arguments::*;
pub use description::*;
pub use environment::*;
pub use launch_file::*;
pub use loader::*;
pub use package::*;
pub use substitution::*;
