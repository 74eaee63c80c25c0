pub mod error;
pub mod job;
pub mod naming;
pub mod request;
pub mod types;
