pub mod workspace;

pub use workspace::{FileNode, Workspace};
