pub mod rate_limit;
pub mod tracing;

pub use self::rate_limit::{limit_requests, limit_streams, RateLimiter};
pub use self::tracing::{init_tracing, trace_requests, ColoredFields};
