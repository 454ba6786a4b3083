#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

pub mod err;
pub mod index_section;
pub mod phive_file;
pub mod phive_header;
pub mod pointer;
pub mod relocation;
pub mod root_level;
pub mod section;
pub mod string_table;
pub mod tag_file;
pub mod type_section;
mod utils;
pub mod varint;

pub use err::{DeserializationError, PhiveError, Result, SerializationError};
pub use phive_file::{FileSummary, LoadState, ParserSettings, PhiveFile};
pub use phive_header::{FileType, PhiveHeader};
pub use pointer::{Array, Ptr, RefPtr, RefVariant, StringPtr};
pub use relocation::{RelocationEngine, RelocationRecord, RelocationTable};
pub use root_level::{NamedVariant, RootLevelContainer};
pub use section::{Signature, Size};
pub use string_table::{TypeCatalog, TypeCategory, TypeInfo};
pub use tag_file::TagFile;
pub use utils::{Ambiguous64, ByteCursor, WriteStream};
pub use varint::VarUInt;

#[cfg(test)]
use std::sync::Once;
#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
