pub mod digest;
pub mod object_store;
