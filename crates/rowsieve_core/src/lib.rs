pub mod arrays;
pub mod config;
pub mod execution;
pub mod explain;
pub mod runtime;
