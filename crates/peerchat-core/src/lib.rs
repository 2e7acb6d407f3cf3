//! peerchat-core: wire protocol and configuration shared by every
//! Peerchat crate. No async runtime lives here.

pub mod config;
pub mod wire;

pub use wire::{FrameDecoder, FrameError, Message};
