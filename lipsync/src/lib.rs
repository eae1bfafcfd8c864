pub mod app;
pub mod pipeline;
pub mod settings;
pub mod stages;
pub mod version;
pub mod workspace;
