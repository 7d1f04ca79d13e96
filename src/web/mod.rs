pub mod api;
pub mod server;

pub use server::{create_router, run_server};
