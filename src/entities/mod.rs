pub mod activation_jobs;
pub mod credentials;
pub mod requests;

pub use activation_jobs as activation_job_entity;
pub use credentials as credential_entity;
pub use requests as request_entity;
pub use requests::RequestStatus;
