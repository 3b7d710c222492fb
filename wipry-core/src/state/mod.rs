pub mod accessory;
pub mod connection;

pub use accessory::{AccessoryInfo, handshake};
pub use connection::{Connection, ConnectionShared, ConnectionState};
