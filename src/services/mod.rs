pub mod chunk_index;
pub mod chunk_store;
pub mod sweeper;
pub mod upload_service;
