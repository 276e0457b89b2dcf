pub mod document;
pub mod operation;
pub mod store;
pub mod transform;

pub use document::Document;
pub use operation::{AppliedOperation, EditOperation, EditSpan};
pub use store::DocumentStore;
