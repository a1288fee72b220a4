pub mod reaper;
pub mod stream_registry;

pub use reaper::{ReaperHandle, RoomReaper};
pub use stream_registry::StreamRegistry;
