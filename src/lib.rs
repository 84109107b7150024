pub mod bulk;
pub mod classify;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod execute;
pub mod manager;
pub mod namespace;
pub mod options;
pub mod protocol;
pub mod query;
pub mod result;
pub mod shell;
pub mod transport;
pub mod write_result;

pub use error::{Error, ErrorKind};
pub use manager::Manager;
pub use result::QueryResult;
pub use write_result::WriteResult;
