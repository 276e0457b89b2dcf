pub mod diagnostics;
pub mod error;
pub mod filetree;
pub mod health;
pub mod messages;
pub mod ready;
pub mod sessioninfo;

pub use diagnostics::*;
pub use error::*;
pub use filetree::*;
pub use health::*;
pub use ready::*;
pub use sessioninfo::*;
