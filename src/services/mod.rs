pub mod activation_service;
pub mod credential_service;
pub mod request_service;
pub mod worker_session;

pub use activation_service::{ActivationReport, ActivationService, Activator};
pub use credential_service::CredentialService;
pub use request_service::RequestService;
pub use worker_session::WorkerSession;
