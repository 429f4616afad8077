mod responder;
mod routes;
mod server;
mod state;
mod stream;

pub use responder::{ChatResponder, DirectQueryResponder};
pub use server::{build_router, GatewayServer};
pub use state::AppState;
