mod block;
mod compression;
mod encoding;
mod error;
mod fs;
mod header;
mod member;
mod pax;
mod reader;
mod view;
mod writer;

pub use block::{BLOCK_SIZE, RECORD_SIZE};
pub use compression::Codec;
pub use encoding::{Encoding, ErrorPolicy, TextCodec};
pub use error::{Error, Result};
pub use member::{Dialect, Member, SparseEntry, TypeFlag};
pub use reader::{ArchiveReader, ErrorLevel, ReadOptions, SeekableStream, StreamReader};
pub use view::{MemberView, StreamView};
pub use writer::{ArchiveWriter, WriteOptions};
