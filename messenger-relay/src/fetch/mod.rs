//! Media acquisition: retrieval strategies, the fallback chain and the image
//! generator.
//!
//! Strategies are tried in order by [`FetchChain`]; each one returns a typed
//! [`FetchError`] which the chain logs and swallows. The chain itself only ever
//! reports success or `None`.

pub mod api;
pub mod chain;
mod error;
pub mod generate;
pub mod shapes;
pub mod tool;
mod traits;

pub use api::{
    ApiStrategy, DownloadApiConfig, DownloadResolver, HttpPayloadFetcher, PayloadFetcher,
    RapidApiResolver,
};
pub use chain::FetchChain;
pub use error::FetchError;
pub use generate::{ImageApiConfig, ImageGenerator};
pub use shapes::{Extracted, ResponseShape};
pub use tool::{ToolConfig, ToolStrategy};
pub use traits::FetchStrategy;
