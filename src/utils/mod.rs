pub mod code_generator;
pub mod phone;

pub use code_generator::{ACCESS_CODE_ALPHABET, generate_access_code, validate_access_code};
pub use phone::*;
