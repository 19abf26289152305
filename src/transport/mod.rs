// Transport module - the seams between adapters and the outside world
//
// Adapters never touch reqwest or tokio::process directly. They go through
// `HttpTransport` or `CommandRunner`, which keeps vendor logic testable with
// scripted fakes.

pub mod cli;
pub mod http;

pub use cli::{CommandRunner, ProcessRunner};
pub use http::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport};
