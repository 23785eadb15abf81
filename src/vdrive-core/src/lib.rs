mod directory;
mod directory_handler;
mod file;
mod path;

pub use directory::*;
pub use directory_handler::*;
pub use file::*;
pub use path::*;
