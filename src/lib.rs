pub mod aggregate;
pub mod auxdata;
pub mod book;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod exchange;

pub use aggregate::{AggregatedBook, AggregationSettings, ViewMode};
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::EngineError;
pub use exchange::ExchangeId;
