pub mod config;
pub mod context;
pub mod errors;
pub mod intent;
pub mod llm;
pub mod model;
pub mod prompts;
pub mod server;
pub mod session;
pub mod state;
pub mod styles;
pub mod utils;
pub mod vba;
pub mod workbook;
