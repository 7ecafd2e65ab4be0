mod people_counting_request_publisher;
mod people_counting_result_listener;
mod topology;

pub use people_counting_request_publisher::*;
pub use people_counting_result_listener::*;
pub use topology::*;
