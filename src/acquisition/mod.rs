//! Acquisition Module
//!
//! The data-acquisition core: one worker owns the rig session and turns
//! front-end requests into commands on the wire, while telemetry coming
//! back is checked against the force limit and persisted.
//!
//! ## Modules
//!
//! - [`dispatcher`] - Encodes commands and writes them to the link
//! - [`pipeline`] - Telemetry parsing, safety check, persistence
//! - [`worker`] - The acquisition thread and its request/event channels

pub mod dispatcher;
pub mod pipeline;
pub mod worker;
