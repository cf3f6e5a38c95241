pub mod browser;
pub mod cookies;
pub mod core;
pub mod error;
pub mod selectors;
pub mod session;

pub use core::types;
pub use core::types::*;
pub use core::AppState;
pub use error::FetchError;
