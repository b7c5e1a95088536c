pub mod handlers;
pub mod items;
pub mod manifests;
pub mod middleware;
pub mod routes;
pub mod targets;

pub use routes::create_router;
