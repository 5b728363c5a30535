pub mod config;
pub mod error;
pub mod model;
pub mod reducer;
pub mod state;
pub mod status;
pub mod validate;

// Backend access
pub mod api;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;

// Directory + editors
pub mod bindings;
pub mod editor;
pub mod store;
