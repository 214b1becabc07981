pub mod capabilities;
pub mod clock;
pub mod entities;
pub mod repositories;

pub use capabilities::*;
pub use clock::*;
pub use entities::*;
pub use ormq_errors::{QueueError, QueueResult};
pub use repositories::*;
