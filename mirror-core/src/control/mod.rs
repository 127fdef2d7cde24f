//! Control channel: desktop → device messages and the device → desktop
//! reply path.

pub mod codec;
pub mod controller;
pub mod message;
pub mod sender;

pub use codec::{ControlMessageCodec, DeviceMessageCodec};
pub use controller::Controller;
pub use message::{ControlMessage, CopyKey, DeviceMessage};
pub use sender::DeviceMessageSender;
