//! Event model and normalization.
//!
//! Raw meeting-server messages come in several envelope shapes; everything
//! downstream of the processor works on one canonical shape instead:
//!
//! ```json
//! { "data": { "type": "event", "id": "<kind>", "attributes": { ... },
//!             "event": { "ts": 1700000000000 } } }
//! ```
//!
//! [`model`] defines that shape and the closed set of canonical kinds;
//! [`normalizer`] maps raw messages onto it.

pub mod model;
pub mod normalizer;

pub use model::{CanonicalEvent, EventData, EventStamp};
pub use normalizer::EventNormalizer;
