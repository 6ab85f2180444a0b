//! APRS gateway core
//!
//! Turns raw AX.25 frames and APRS-IS text lines into canonical, decoded,
//! reference counted packets, suppresses duplicates heard over several paths
//! and remembers the last known position of every station, object and item.

pub mod aprs;
pub mod aprs_filters;
pub mod ax25;
pub mod callsign;
pub mod cell_arena;
pub mod config;
pub mod dupecheck;
pub mod gateway;
pub mod history;
pub mod keyhash;
pub mod log_format;
pub mod metrics;
pub mod packet_buffer;
pub mod packet_type;
pub mod position;
pub mod tnc2;

pub use config::GatewayConfig;
pub use gateway::{Discard, DiscardReason, Gateway};
pub use packet_buffer::{Packet, PacketPool, PacketSource};
pub use packet_type::{PacketFlags, PacketType};
pub use position::Position;
