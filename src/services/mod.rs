pub mod artifacts;
pub mod controller;
pub mod engines;
pub mod events;
pub mod export;
pub mod llm;
pub mod workflow;
