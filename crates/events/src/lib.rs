//! Change fan-out: bus mechanics and the notices published on it.
//!
//! Notices carry just enough to tell an observer "re-fetch this". They are
//! never the source of truth and may be lost, duplicated or reordered.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod notice;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notice::{ChangeNotice, Topic};
