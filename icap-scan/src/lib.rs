#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod config;
pub mod error;
pub mod net;
pub mod parser;
pub mod request;
pub mod session;
pub mod validate;
pub mod verdict;

pub use config::ScanConfig;
pub use error::{Error, IcapResult};
pub use parser::ParsedHeader;
pub use session::Session;
pub use validate::{FilePolicy, ValidationResult, validate};
pub use verdict::{ContentDataTemplate, ScanResult, VerdictExtractor};

///Lib version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
///Max Header size
pub const MAX_HDR_BYTES: usize = 64 * 1024;
/// Protocol version written on the request line by default.
pub const ICAP_VERSION: &str = "ICAP/1.0";
/// Service path used when the configuration does not name one.
pub const DEFAULT_SERVICE: &str = "wwreqmod";
