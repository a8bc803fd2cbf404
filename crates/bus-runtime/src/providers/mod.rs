//! Broker provider implementations.
//!
//! This module contains concrete implementations of the `BusProvider` trait.
//! Bindings to external brokers implement the same trait and are plugged in
//! with `StandardBusClient::with_provider`.

pub mod memory;

pub use memory::InMemoryProvider;
