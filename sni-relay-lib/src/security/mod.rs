pub mod ip_filter;
pub mod rate_limit;

pub use ip_filter::IpFilter;
pub use rate_limit::{spawn_sweeper, RateLimiter};
