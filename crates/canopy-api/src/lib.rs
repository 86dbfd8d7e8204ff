// canopy-api: Async Rust client for the Canopy farm backend (REST tables + realtime feed)

pub mod error;
pub mod realtime;
pub mod rest;
pub mod transport;

pub use error::Error;
pub use realtime::{
    ChangeType, ChannelTopic, PostgresChange, RealtimeClient, RealtimeConfig, ReconnectConfig,
    SocketState,
};
pub use rest::RestClient;
pub use rest::models::tables;
pub use transport::{ApiCredentials, TlsMode, TransportConfig};
