pub mod dto;
mod leases;
mod repos;
pub mod response;
mod router;

pub use router::{AppState, REQUEST_ID_HEADER, create_router};
