pub mod assets;
pub mod errors;
pub mod events;
pub mod mutation;
pub mod treasury;
pub mod workflow;
