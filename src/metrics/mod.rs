//! Build step metrics
//!
//! - `payload` - the record schema sent to the backend
//! - `timer` - start/finish correlation
//! - `reporter` - event handlers tying it together
//! - `delivery` - direct or batched submission
//! - `transport` - Keen, file and stdout sinks

pub mod delivery;
pub mod payload;
pub mod reporter;
pub mod timer;
pub mod transport;

pub use delivery::DeliverySummary;
pub use reporter::MetricsReporter;
