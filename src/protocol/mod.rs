//! Wire encodings for probe commands.
//!
//! Two encodings exist. [`Encoding::Byte`] writes each command as its bare
//! one-octet code and is the default. [`Encoding::Framed`] wraps the code in
//! a length-prefixed frame that also carries a backward port:
//!
//! ```text
//! +----------------+---------+-----------------+
//! | length: u32 BE | code:u8 | backward: u16 BE|
//! |   always 3     |         |                 |
//! +----------------+---------+-----------------+
//! ```
//!
//! A framed Subscribe with no backward port is `00 00 00 03 01 00 00`.
//!
//! Replies travel the other way as JSON lines; see [`reply`].

pub mod codec;
pub mod reply;

pub use codec::{Encoding, Frame, FrameDecoder};
pub use reply::{ClientInfo, Reply};
