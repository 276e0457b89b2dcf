pub mod diagnostics;
pub mod file_admin;
pub mod file_content;
pub mod file_tree;
pub mod health;
pub mod session_create;
pub mod session_info;

pub use diagnostics::*;
pub use file_admin::*;
pub use file_content::*;
pub use file_tree::*;
pub use health::*;
pub use session_create::*;
pub use session_info::*;
