pub mod config;
pub mod uri;

pub use config::{HandlerConfig, LoaderSection, VfsConfig};
pub use uri::{ResourceUri, UriError};
