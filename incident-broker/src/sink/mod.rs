// incident-broker/src/sink/mod.rs
// ============================================================================
// Module: Incident Broker Event Bus Sinks
// Description: Concrete EventBus implementations.
// Purpose: Deliver normalized signals, patterns, decisions, and actions to a
//          durable or in-process sink.
// Dependencies: incident-core
// ============================================================================

//! ## Overview
//! An [`incident_core::EventBus`] implementation owns delivery, not the
//! caller: publishers hand over a topic and message and trust the sink to
//! route, retry, or buffer as its backend requires.

pub mod channel;
pub mod log;

pub use channel::ChannelEventBus;
pub use log::LogEventBus;
