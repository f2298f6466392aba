//! REST access to the tutoring backend.

pub mod client;
pub mod notify;
pub mod stub;
pub mod transport;

pub use client::ApiClient;
pub use notify::{FanoutNotifier, MemoryNotifier, Notification, Notifier, TracingNotifier};
pub use stub::StubTransport;
pub use transport::{ApiRequest, ApiResponse, Body, HttpTransport, Method, ReqwestTransport, TransportError};
