pub mod array;
pub mod batch;
pub mod compute;
pub mod datatype;
pub mod scalar;
pub mod testutil;
pub mod validity;
