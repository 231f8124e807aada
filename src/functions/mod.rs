pub mod delivery;
pub mod gateway;
pub mod lifecycle;

pub use gateway::*;
pub use lifecycle::*;
