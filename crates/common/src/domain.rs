mod lecture;
mod people_counting;
mod result;

pub use lecture::*;
pub use people_counting::*;
pub use result::*;
