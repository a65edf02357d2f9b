pub mod alternate;
pub mod concepts;
pub mod feedback;
pub mod framework;
pub mod queue;
pub mod repair;
pub mod resolve;
pub mod router;
pub mod scheduler;
pub mod timer;
pub mod util;
pub mod wire;
