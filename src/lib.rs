pub mod artifact;
pub mod bake;
pub mod barrier;
pub mod build;
pub mod config;
pub mod dag;
pub mod errors;
pub mod git;
pub mod logging;
pub mod pipeline;
pub mod promote;
pub mod release_config;
pub mod store;
pub mod target;
pub mod ui;
pub mod version;
