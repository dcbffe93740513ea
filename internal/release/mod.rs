pub mod delivery;
pub mod error;
pub mod publish;
pub mod resolve;
