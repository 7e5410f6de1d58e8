pub mod client;
pub mod request;
pub mod response;
pub mod types;

// Re-export commonly used types for convenient access
pub use client::{Client, HttpTransport, TransportError};
pub use request::{ResolvedBody, ResolvedRequest};
pub use response::CapturedResponse;
pub use types::{Method, Status};
