//! Connection pooling and throttling for remote endpoints.

pub mod endpoint;
mod gate;
pub mod pool;
pub mod throttle;

#[cfg(test)]
mod testing;

pub use endpoint::Endpoint;
pub use pool::{spawn_maintenance, ConnectionPool, PoolConfig, PoolStats, SessionLease};
pub use throttle::{spawn_pruning, ConnectionThrottleManager, GateStats, ThrottleConfig, ThrottleLease, ThrottleLimits};
