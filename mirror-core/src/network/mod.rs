pub mod connection;

pub use connection::{ConnectionOptions, DesktopConnection, device_meta};
