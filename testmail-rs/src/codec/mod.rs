//! Line-oriented wire codec shared by POP3 and SMTP
//!
//! - [`line`]: CRLF framed reads/writes over a buffered stream
//! - [`dot`]: multi-line block termination and dot-transparency

pub mod dot;
pub mod line;

pub use dot::{split_lines, stuff_block, trim_line_ending, unstuff_block, TERMINATOR};
pub use line::{show_raw, LineCodec};
