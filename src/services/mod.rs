pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod reviewer;
pub mod stream;
pub mod wizard;
pub mod writer;
