//! Domain layer: entities, value objects, state machines, and domain
//! errors. No I/O here; persistence and provider calls live behind the
//! ports.

pub mod foundation;
pub mod invoice;
pub mod payment;
pub mod subscription;
pub mod webhook;
