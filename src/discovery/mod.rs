//! Locating the application under test on the local network

pub mod listener;
pub mod timeout;

pub use listener::{
    discover, parse_broadcast, AppEndpoint, DiscoveryListener, DEFAULT_DISCOVERY_PORT,
    DEFAULT_DISCOVERY_TIMEOUT,
};
pub use timeout::TimeoutBudget;
