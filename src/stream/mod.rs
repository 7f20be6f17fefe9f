/// Multiplexed duplex transport for transactions
///
/// All requests of one transaction share a single duplex stream. The
/// dispatcher owns the outgoing half, the collector demultiplexes the incoming
/// half by request id, and the iterator consumes streamed answers with
/// explicit flow control.
pub mod bidirectional;
pub mod collector;
pub mod dispatcher;
pub mod iterator;

pub use bidirectional::{BidirectionalStream, SingleResponse};
pub use collector::{ResponseCollector, ResponseQueue};
pub use dispatcher::{DispatchConfig, RequestDispatcher};
pub use iterator::{IteratorState, ResponseIterator};
