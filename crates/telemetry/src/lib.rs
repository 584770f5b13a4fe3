//! Tracer implementations for Tandem.
//!
//! The agent loop opens a span per run, per model call and per tool call
//! through the [`Tracer`](tandem_core::Tracer) boundary. This crate provides
//! two sinks: [`RecordingTracer`] keeps closed spans grouped into traces for
//! inspection, and [`LogTracer`] emits a `tracing` event as each span closes.

pub mod log;
pub mod model;
pub mod recorder;

pub use log::LogTracer;
pub use model::{SpanRecord, Trace};
pub use recorder::RecordingTracer;
