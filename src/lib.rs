pub mod cache;
pub mod config;
pub mod constants;
pub mod corrections;
pub mod db;
pub mod decision;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod oracle;
pub mod reconciler;
pub mod resolver;
pub mod segment;
pub mod source;
pub mod storage;
pub mod types;
