// ABOUTME: Shared test fixtures for the integration suites
//
// TestBackend is an in-memory provider whose connections are sequence
// numbers. It records every call and can be told to fail selectively.

#![allow(dead_code)]

pub mod backend;

pub use backend::TestBackend;

use provider_pool::pool::{ManagerConfig, PoolEvent};
use std::time::Duration;
use tokio::sync::broadcast;

/// Manager config with a short health check interval
pub fn fast_health_config(interval: Duration) -> ManagerConfig {
    ManagerConfig {
        health_check_interval: interval,
        ..ManagerConfig::default()
    }
}

/// Drain every event currently buffered on a receiver
pub fn drain(rx: &mut broadcast::Receiver<PoolEvent>) -> Vec<PoolEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
