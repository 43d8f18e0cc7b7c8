pub mod arxiv;
pub mod config;
pub mod error;
pub mod extract;
pub mod handoff;
pub mod http;
pub mod llm;
pub mod notify;
pub mod paper;
pub mod pipeline;
pub mod reconcile;

pub use config::Config;
pub use error::CiphrError;
pub use paper::PaperRecord;
