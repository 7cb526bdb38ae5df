pub mod common;
pub mod credential;
pub mod pagination;
pub mod request;
pub mod transition;

pub use common::*;
pub use credential::*;
pub use pagination::*;
pub use request::*;
pub use transition::Transition;
