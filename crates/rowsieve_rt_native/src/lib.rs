pub mod runtime;
pub mod threaded;
