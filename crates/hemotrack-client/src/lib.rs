pub mod adapters;
pub mod fetcher;

pub use adapters::{KrakowAdapter, RzeszowAdapter, WroclawAdapter, builtin_adapters};
pub use fetcher::ReqwestFetcher;
