pub mod credential;
pub mod feed;
pub mod request;

pub use credential::credential_config;
pub use feed::feed_config;
pub use request::request_config;
