//! CLI commands for the ICE risk client.

pub mod cache;
pub mod dates;
pub mod flatten;
pub mod registry;
pub mod venue;

pub use cache::{run_cache, CacheArgs};
pub use dates::{run_dates, DatesArgs};
pub use flatten::{run_flatten, FlattenArgs};
pub use registry::{run_registry, RegistryArgs};
pub use venue::{
    run_im, run_mv, run_price, run_results, ImArgs, MvArgs, PriceArgs, ResultsArgs,
};
