pub mod balances;
pub mod exchanges;
pub mod health;
pub mod jobs;
pub mod notifications;
pub mod orders;
pub mod positions;
pub mod response;
pub mod routes;
pub mod strategies;

pub use routes::build_router;
