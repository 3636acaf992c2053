mod health;
mod server;

pub use health::{
    format_uptime, health_response, not_found_response, ready_response, stats_response,
};
pub use server::run;
