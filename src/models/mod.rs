pub mod book;
pub mod document;
pub mod enums;
pub mod task;

pub use book::*;
pub use document::*;
pub use task::*;
