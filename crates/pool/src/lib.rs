pub mod connection;
pub mod media_server;
pub mod room;

pub use connection::{ClientFactory, ConnectionHandle, ConnectionMetrics, ConnectionPool, ConnectionState, GlobalCounters, PoolAggregate};
pub use media_server::{build_room_metadata, MediaServerApi, RoomInfo};
pub use room::{RoomEntry, RoomLedger};
