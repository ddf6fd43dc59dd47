//! Shared application state handed to every axum handler.

use std::sync::Arc;

use relay_core::App;

pub type AppState = Arc<App>;
