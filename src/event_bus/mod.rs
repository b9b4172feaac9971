pub mod bus;
pub mod event;
pub mod observer;
pub mod sink;

pub use bus::EventBus;
pub use event::Event;
pub use observer::EventBusObserver;
pub use sink::{EventSink, MemorySink, StdOutSink};
