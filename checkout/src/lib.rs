pub mod cart;
pub mod config;
pub mod db;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod order;
pub mod pending;
pub mod pricing;
pub mod promotion;
pub mod reservation;

pub mod error;
pub mod logger;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
