pub mod command;
pub mod hf_hub;
pub mod http;
pub mod progress;

pub use command::{CommandOutcome, CommandSpec, ensure_in_path};
