pub mod client;
pub mod filter;
pub mod paginate;
mod record;
pub mod store;
