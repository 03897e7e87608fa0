pub mod cli;
pub mod core;
pub mod services;
pub mod utils;
