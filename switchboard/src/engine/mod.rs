pub mod events;
pub mod permissions;
pub mod rate_limiter;
pub mod tasks;
