pub(crate) mod bytes;
mod byte_cursor;
mod write_stream;

pub use self::byte_cursor::{Ambiguous64, ByteCursor};
pub use self::write_stream::WriteStream;
