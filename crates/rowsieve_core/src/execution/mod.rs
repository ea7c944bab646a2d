pub mod cancel;
pub mod operators;
pub mod pipeline;
pub mod planner;
pub mod stream;
