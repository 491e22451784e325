pub mod clock;
pub mod estimator;
pub mod poller;
pub mod roster;
pub mod tracker;

pub use clock::*;
pub use estimator::*;
pub use poller::*;
pub use roster::*;
pub use tracker::*;
