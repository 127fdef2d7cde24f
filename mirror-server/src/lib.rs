//! # mirror-server
//!
//! Device-side mirroring server. Streams the screen and audio of the
//! device to a desktop client over local sockets and injects the input
//! events the client sends back.
//!
//! ## Channels
//!
//! - **video**: `svideo`, encoded screen
//! - **audio**: `saudio`, encoded or raw PCM audio
//! - **control**: `svideo-control`, input events in, clipboard out

pub mod config;
pub mod service;
