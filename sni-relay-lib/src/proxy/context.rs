use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::proxy::router::RouteTable;
use crate::proxy::stats::StatsTracker;
use crate::security::{IpFilter, RateLimiter};

/// Everything a connection handler needs, shared across all handlers.
/// The route table and filter are immutable after construction; the rate
/// limiter and stats synchronize internally.
pub struct ProxyContext {
    pub config: Config,
    pub routes: RouteTable,
    pub ip_filter: IpFilter,
    pub rate_limiter: Arc<RateLimiter>,
    pub stats: Arc<StatsTracker>,
}

impl ProxyContext {
    pub fn new(config: Config, routes: RouteTable) -> Arc<Self> {
        let ip_filter = IpFilter::parse(&config.allowed_ips);
        if ip_filter.is_empty() {
            warn!("ALLOWED_IPS is empty; admitting every source address");
        } else if ip_filter.allows_any() {
            info!("allow-list contains 0.0.0.0/0; admitting every source address");
        }
        if routes.is_empty() {
            warn!("route table is empty; every SNI will be denied");
        }

        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_ip));

        info!(
            routes = routes.len(),
            filter_rules = ip_filter.rules().len(),
            rate_limit_per_ip = config.rate_limit_per_ip,
            "proxy context initialized"
        );

        Arc::new(Self {
            config,
            routes,
            ip_filter,
            rate_limiter,
            stats: Arc::new(StatsTracker::new()),
        })
    }
}
