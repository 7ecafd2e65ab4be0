mod ack;
mod client;
mod envelope;
mod listener;
mod subscription;

pub use ack::*;
pub use client::*;
pub use envelope::*;
pub use listener::*;
pub use subscription::*;
