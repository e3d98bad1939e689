pub mod extract;
pub mod health_handlers;
pub mod upload_handlers;
