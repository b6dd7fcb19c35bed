//! HTTP plumbing: request/response descriptors, the transport seam and
//! status errors.

mod error;
mod request;
mod transport;

pub use error::{StatusError, is_unauthorized};
pub use request::{ApiRequest, ApiResponse, Attempt};
pub use transport::{ReqwestTransport, Transport};

#[cfg(test)]
pub use transport::MockTransport;
