//! Non-blocking, accounted delivery of events to a broker.
//!
//! ## Structure
//!
//! - [`dispatcher`] - The [`Dispatcher`] and the [`EventSink`] seam used by
//!   simulators.
//! - [`completion`] - Ack/failure channels and their drain loops.
//! - [`counters`] - Lock-free delivery counters and [`DeliveryStats`].

pub mod completion;
pub mod counters;
pub mod dispatcher;

pub use completion::{Ack, CompletionSink, CompletionStreams, DeliveryFailure, completion_channel};
pub use counters::DeliveryStats;
pub use dispatcher::{Dispatcher, EventSink};
