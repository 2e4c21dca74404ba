pub mod routes;
pub mod server;
pub mod state;

pub use routes::create_router;
pub use server::{build_state, run};
pub use state::AppState;
