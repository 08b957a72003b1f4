//! Concrete implementations of the port traits.

pub mod memory;
pub mod mock;
pub mod postgres;
pub mod stripe;
