pub mod model;
pub mod registry;

pub use registry::AuctionRegistry;
