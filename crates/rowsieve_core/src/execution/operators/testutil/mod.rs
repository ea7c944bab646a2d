mod wrapper;

pub use wrapper::*;
