//! Wire framing and head parsing.
//!
//! - [`wire`]: bounded terminator reads and chunked transfer coding
//! - [`header`]: status line and `Key: Value` header parsing

pub mod header;
pub mod wire;

pub use header::{ParsedHeader, parse_header, parse_status};
pub use wire::{CHUNKED_TERMINATOR, HEADER_TERMINATOR, read_until, write_chunked};
