mod handlers;
mod server;

pub use handlers::{
    healthz_handler, readyz_handler, track_connections, work_handler, WorkParams,
};
pub use server::{demo_routes, router, HttpServer, ServerState};
