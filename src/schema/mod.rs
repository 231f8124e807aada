pub mod job;
pub mod message;
pub mod outcome;

pub use job::*;
pub use message::*;
pub use outcome::*;
