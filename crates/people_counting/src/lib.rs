mod amqp;
mod domain;
mod people_counting;

pub use amqp::*;
pub use domain::*;
pub use people_counting::*;
