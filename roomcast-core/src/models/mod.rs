pub mod auth_cookie;
pub mod client;
pub mod events;
pub mod ids;
pub mod namespace;
pub mod playback;
pub mod queue;
pub mod rbac;
pub mod round_robin;
pub mod stream;
pub mod timer;

pub use auth_cookie::AuthCookie;
pub use client::Client;
pub use ids::{ConnectionId, RoomName};
pub use namespace::{Namespace, Room};
pub use playback::{Playback, PlaybackStatus};
pub use queue::{AggregatableQueue, StreamRef};
pub use rbac::{Authorizer, Role, Rule};
pub use round_robin::RoundRobinQueue;
pub use stream::{Stream, StreamKind};
pub use timer::{Timer, TimerState, TimerStatus};
