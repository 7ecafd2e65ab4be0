mod client;
mod error;
mod lapin_channel;
mod message;
mod traits;

pub use client::*;
pub use error::*;
pub use lapin_channel::*;
pub use message::*;
pub use traits::*;
