pub mod artifacts;
pub mod inference;
pub mod upload;
pub mod worker;
