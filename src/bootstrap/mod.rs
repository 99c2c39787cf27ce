mod server;
mod shutdown;
mod state;

pub use server::Server;
pub use shutdown::{SendGuard, Shutdown, ShutdownState};
pub use state::{AppState, SharedAppState};
