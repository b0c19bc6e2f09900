pub mod parameters_cache;

pub use parameters_cache::ParametersCache;
