pub mod cli;
pub mod config;
pub mod context;
pub mod embed;
pub mod indexer;
mod metrics;
pub mod retriever;
pub mod server;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use context::{Context, ContextBuilder, SharedContext};
pub use indexer::{IndexSummary, Indexer, ItemFailure};
pub use retriever::{InputError, QueryImage, Retriever, SearchHit};
