pub mod discovery_route;
pub mod files_request;
pub mod index_route;
pub mod remove_route;
