//! Sequential scan over header blocks, and the two reader front ends
//! built on it: `ArchiveReader` for seekable transports, `StreamReader`
//! for forward-only ones.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::block::{self, BLOCK_SIZE};
use crate::compression::{Codec, CodecReader};
use crate::encoding::TextCodec;
use crate::error::{Error, Result};
use crate::header;
use crate::member::{Member, TypeFlag};
use crate::pax::{self, PendingExt};
use crate::view::{MemberView, StreamView};

/// Extension records larger than this are treated as corruption rather
/// than allocated.
const MAX_EXT_SIZE: u64 = 16 * 1024 * 1024;

/// How the scan reacts to a damaged header in the middle of an archive.
/// Damage that makes the whole archive unreadable (truncation, no
/// terminator) raises regardless.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorLevel {
    /// Drop the damaged block and resync at the next one.
    Skip,
    /// Like `Skip`, but keep the error in the anomaly report.
    Collect,
    /// Propagate immediately.
    Raise,
}

impl Default for ErrorLevel {
    fn default() -> Self {
        ErrorLevel::Raise
    }
}

/// Reader configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// `None` sniffs the codec from the stream's magic; an explicit
    /// codec is enforced against it.
    pub codec: Option<Codec>,
    pub text: TextCodec,
    pub level: ErrorLevel,
}

/// One-pass header scan. The caller owns stream positioning: the stream
/// must sit at `offset` when `next_member` is called, and the member's
/// data is left unconsumed.
pub(crate) struct Scanner {
    pub(crate) offset: u64,
    text: TextCodec,
    level: ErrorLevel,
    global_pax: HashMap<String, String>,
    pub(crate) anomalies: Vec<Error>,
    done: bool,
}

impl Scanner {
    pub(crate) fn new(text: TextCodec, level: ErrorLevel) -> Scanner {
        Scanner {
            offset: 0,
            text,
            level,
            global_pax: HashMap::new(),
            anomalies: Vec::new(),
            done: false,
        }
    }

    fn note(&mut self, err: Error) -> Result<()> {
        match self.level {
            ErrorLevel::Raise => Err(err),
            ErrorLevel::Collect => {
                debug!(error = %err, "collected scan anomaly");
                self.anomalies.push(err);
                Ok(())
            }
            ErrorLevel::Skip => {
                debug!(error = %err, "skipped scan anomaly");
                Ok(())
            }
        }
    }

    /// Read the padded data area of an extension record.
    fn read_ext_data<R: Read>(&mut self, stream: &mut R, member: &Member) -> Result<Vec<u8>> {
        let stored = member.stored_size();
        if stored > MAX_EXT_SIZE {
            return Err(Error::corrupt(
                member.offset,
                format!("extension record claims {} bytes", stored),
            ));
        }
        let padded = block::padded(stored);
        let mut buf = vec![0u8; padded as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = stream.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::Truncated(format!(
                    "end of stream inside extension record at offset {}",
                    member.offset
                )));
            }
            filled += n;
        }
        self.offset += padded;
        buf.truncate(stored as usize);
        Ok(buf)
    }

    /// Produce the next real member, consuming any extension records in
    /// front of it. Returns `None` at the archive terminator.
    pub(crate) fn next_member<R: Read>(&mut self, stream: &mut R) -> Result<Option<Member>> {
        if self.done {
            return Ok(None);
        }
        let mut pending = PendingExt::default();
        let mut block = [0u8; BLOCK_SIZE];

        loop {
            let start = self.offset;
            let got = match block::read_block(stream, &mut block) {
                Ok(got) => got,
                Err(Error::Truncated(_)) if start == 0 => {
                    return Err(Error::Read(
                        "does not look like an archive: less than one block long".to_string(),
                    ));
                }
                Err(err) => return Err(err),
            };
            if got.is_none() {
                self.done = true;
                if start == 0 {
                    return Err(Error::Read("empty stream".to_string()));
                }
                if !pending.is_empty() {
                    // An extension record promised a real header that
                    // never arrived; the archive is structurally
                    // unreadable, not merely cut short.
                    return Err(Error::Read(
                        "end of stream inside an extension sequence".to_string(),
                    ));
                }
                return Err(Error::Truncated(
                    "end of stream before archive terminator".to_string(),
                ));
            }
            self.offset += BLOCK_SIZE as u64;

            if block::is_zero_block(&block) {
                self.done = true;
                let confirmed = match block::read_block(stream, &mut block)? {
                    Some(()) => {
                        self.offset += BLOCK_SIZE as u64;
                        block::is_zero_block(&block)
                    }
                    None => false,
                };
                if !confirmed {
                    self.note(Error::Truncated(format!(
                        "lone terminator block at offset {}",
                        start
                    )))?;
                }
                return Ok(None);
            }

            let mut member = match header::decode(&block, start, &self.text) {
                Ok(m) => m,
                Err(err) => {
                    if start == 0 {
                        return Err(Error::Read(format!("does not look like an archive: {}", err)));
                    }
                    self.note(err)?;
                    // Resync block by block; whatever extensions were
                    // buffered belonged to the damaged run.
                    pending = PendingExt::default();
                    continue;
                }
            };

            match member.typeflag {
                TypeFlag::GnuLongName => {
                    pending.note_offset(start);
                    pending.longname = Some(self.read_ext_data(stream, &member)?);
                }
                TypeFlag::GnuLongLink => {
                    pending.note_offset(start);
                    pending.longlink = Some(self.read_ext_data(stream, &member)?);
                }
                TypeFlag::PaxExtended => {
                    pending.note_offset(start);
                    let data = self.read_ext_data(stream, &member)?;
                    let records = pax::parse_pax_records(&data, start)?;
                    pending.pax.get_or_insert_with(HashMap::new).extend(records);
                }
                TypeFlag::PaxGlobal => {
                    let data = self.read_ext_data(stream, &member)?;
                    let records = pax::parse_pax_records(&data, start)?;
                    debug!(records = records.len(), "pax global header");
                    self.global_pax.extend(records);
                }
                TypeFlag::GnuSparse => {
                    let mut extended = header::sparse_is_extended(&block);
                    while extended {
                        let at = self.offset;
                        if block::read_block(stream, &mut block)?.is_none() {
                            return Err(Error::Truncated(
                                "end of stream inside sparse map".to_string(),
                            ));
                        }
                        self.offset += BLOCK_SIZE as u64;
                        let (entries, more) = header::parse_sparse_continuation(&block, at)?;
                        if let Some(sparse) = member.sparse.as_mut() {
                            sparse.extend(entries);
                        }
                        extended = more;
                    }
                    pending.apply(&mut member, &self.global_pax, &self.text)?;
                    member.data_offset = self.offset;
                    return Ok(Some(member));
                }
                _ => {
                    pending.apply(&mut member, &self.global_pax, &self.text)?;
                    member.data_offset = self.offset;
                    return Ok(Some(member));
                }
            }
        }
    }
}

/// Seekable stream behind an `ArchiveReader`: the file itself for raw
/// archives, or the fully decompressed image for compressed ones, since
/// the codecs only decode forward.
pub enum SeekableStream {
    File(File),
    Memory(Cursor<Vec<u8>>),
}

impl Read for SeekableStream {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        match self {
            SeekableStream::File(f) => f.read(out),
            SeekableStream::Memory(c) => c.read(out),
        }
    }
}

impl Seek for SeekableStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            SeekableStream::File(f) => f.seek(pos),
            SeekableStream::Memory(c) => c.seek(pos),
        }
    }
}

/// Random-access reader: scans the whole archive up front and hands out
/// seekable views over member data.
///
/// The stream sits in a `RefCell` because every view shares the one
/// physical cursor; each operation re-seeks before reading.
pub struct ArchiveReader<R: Read + Seek = SeekableStream> {
    stream: RefCell<R>,
    members: Vec<Member>,
    index: HashMap<String, usize>,
    anomalies: Vec<Error>,
}

impl<R: Read + Seek> fmt::Debug for ArchiveReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("members", &self.members.len())
            .field("anomalies", &self.anomalies.len())
            .finish()
    }
}

impl ArchiveReader<SeekableStream> {
    /// Open a file with codec auto-detection.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        let mut file = File::open(path)?;
        let codec = resolve_codec(&mut file, options.codec)?;
        let seekable = match codec {
            Codec::None => SeekableStream::File(file),
            _ => SeekableStream::Memory(Cursor::new(decompress_image(file, codec)?)),
        };
        Self::new_with(seekable, options)
    }

    /// Read an archive already held in memory.
    pub fn from_bytes(bytes: Vec<u8>, options: ReadOptions) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let codec = resolve_codec(&mut cursor, options.codec)?;
        let seekable = match codec {
            Codec::None => SeekableStream::Memory(cursor),
            _ => SeekableStream::Memory(Cursor::new(decompress_image(cursor, codec)?)),
        };
        Self::new_with(seekable, options)
    }
}

/// Sniff the codec from the stream head and validate any explicit
/// request against it. Leaves the stream rewound.
fn resolve_codec<S: Read + Seek>(stream: &mut S, requested: Option<Codec>) -> Result<Codec> {
    let mut magic = [0u8; 3];
    let mut got = 0;
    while got < magic.len() {
        let n = stream.read(&mut magic[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    stream.seek(SeekFrom::Start(0))?;
    let found = Codec::detect(&magic[..got]);
    match requested {
        Some(codec) => {
            if codec != Codec::None && found != codec {
                return Err(Error::Read(format!(
                    "expected a {} stream, found {}",
                    codec, found
                )));
            }
            Ok(codec)
        }
        None => Ok(found),
    }
}

/// Seekable access through a forward-only codec means decoding the
/// whole image once.
fn decompress_image<S: Read>(stream: S, codec: Codec) -> Result<Vec<u8>> {
    let mut reader = CodecReader::with_codec(stream, codec)?;
    let mut image = Vec::new();
    reader.read_to_end(&mut image)?;
    debug!(codec = %codec, bytes = image.len(), "decompressed archive image");
    Ok(image)
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Wrap a seekable stream carrying uncompressed archive bytes.
    /// `options.codec` has no effect here.
    pub fn new(stream: R) -> Result<ArchiveReader<R>> {
        Self::new_with(stream, ReadOptions::default())
    }

    pub fn new_with(mut stream: R, options: ReadOptions) -> Result<ArchiveReader<R>> {
        let (members, index, anomalies) = Self::scan_stream(&mut stream, options)?;
        Ok(ArchiveReader {
            stream: RefCell::new(stream),
            members,
            index,
            anomalies,
        })
    }

    fn scan_stream(
        stream: &mut R,
        options: ReadOptions,
    ) -> Result<(Vec<Member>, HashMap<String, usize>, Vec<Error>)> {
        stream.seek(SeekFrom::Start(0))?;
        let mut scanner = Scanner::new(options.text, options.level);
        let mut members = Vec::new();
        while let Some(member) = scanner.next_member(stream)? {
            debug!(name = %member.name, size = member.size, "scanned member");
            // Skip the data area by seeking; truncation shows up at the
            // next header read.
            scanner.offset += block::padded(member.stored_size());
            stream.seek(SeekFrom::Start(scanner.offset))?;
            members.push(member);
        }
        let mut index = HashMap::new();
        for (i, member) in members.iter().enumerate() {
            // Later entries supersede earlier ones.
            index.insert(member.name.clone(), i);
        }
        Ok((members, index, scanner.anomalies))
    }

    /// All members in arrival order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    /// Look a member up by name; duplicates resolve to the last
    /// occurrence.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.index.get(name).map(|i| &self.members[*i])
    }

    /// Anomalies collected during the scan under `ErrorLevel::Collect`.
    pub fn anomalies(&self) -> &[Error] {
        &self.anomalies
    }

    /// A seekable view over one member's data. Links resolve to the
    /// member they point at.
    pub fn view(&self, member: &Member) -> Result<MemberView<'_, R>> {
        let member = if member.is_link() {
            let target = link_target(member);
            self.member(&target)
                .ok_or_else(|| Error::Read(format!("linked file {:?} not found", target)))?
        } else {
            member
        };
        Ok(MemberView::new(&self.stream, member))
    }

    /// Convenience: the member's entire logical content.
    pub fn read_all(&self, member: &Member) -> Result<Vec<u8>> {
        let mut view = self.view(member)?;
        let mut out = Vec::with_capacity(member.size as usize);
        view.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Archive-internal path a link member points at.
fn link_target(member: &Member) -> String {
    if member.is_hardlink() {
        // Hardlink targets are archive-absolute.
        return normalize_path(&member.linkname);
    }
    let joined = match member.name.rfind('/') {
        Some(i) => format!("{}/{}", &member.name[..i], member.linkname),
        None => member.linkname.clone(),
    };
    normalize_path(&joined)
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Forward-only reader: one pass, one member at a time, data readable
/// at most once.
pub struct StreamReader<R: Read> {
    stream: CodecReader<R>,
    scanner: Scanner,
    current: Option<Member>,
    consumed: bool,
    /// Physical bytes of the current member not yet read.
    pub(crate) stored_left: u64,
    pad_left: u64,
}

impl<R: Read> fmt::Debug for StreamReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("offset", &self.scanner.offset)
            .field("current", &self.current.as_ref().map(|m| m.name.as_str()))
            .finish()
    }
}

impl StreamReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        Self::new_with(File::open(path)?, options)
    }
}

impl<R: Read> StreamReader<R> {
    pub fn new(stream: R) -> Result<StreamReader<R>> {
        Self::new_with(stream, ReadOptions::default())
    }

    pub fn new_with(stream: R, options: ReadOptions) -> Result<StreamReader<R>> {
        let stream = match options.codec {
            Some(codec) => CodecReader::with_codec(stream, codec)?,
            None => CodecReader::auto(stream)?.1,
        };
        Ok(StreamReader {
            stream,
            scanner: Scanner::new(options.text, options.level),
            current: None,
            consumed: false,
            stored_left: 0,
            pad_left: 0,
        })
    }

    /// Advance to the next member, discarding whatever is left of the
    /// current one's data.
    pub fn next_member(&mut self) -> Result<Option<Member>> {
        let leftover = self.stored_left + self.pad_left;
        if leftover > 0 {
            block::skip(&mut self.stream, leftover)?;
            self.stored_left = 0;
            self.pad_left = 0;
        }
        self.current = None;
        self.consumed = false;

        match self.scanner.next_member(&mut self.stream)? {
            Some(member) => {
                let stored = member.stored_size();
                self.stored_left = stored;
                self.pad_left = block::padded(stored) - stored;
                self.scanner.offset += block::padded(stored);
                self.current = Some(member.clone());
                Ok(Some(member))
            }
            None => Ok(None),
        }
    }

    /// The member the cursor currently sits on.
    pub fn current(&self) -> Option<&Member> {
        self.current.as_ref()
    }

    /// A one-pass view over the current member's data.
    pub fn view(&mut self) -> Result<StreamView<'_, R>> {
        let member = match &self.current {
            Some(m) => m.clone(),
            None => {
                return Err(Error::Stream(
                    "no current member to extract".to_string(),
                ))
            }
        };
        if member.is_link() {
            return Err(Error::Stream(format!(
                "cannot extract link {:?} from a forward-only stream",
                member.name
            )));
        }
        if self.consumed {
            return Err(Error::Stream(format!(
                "data of {:?} already passed on a forward-only stream",
                member.name
            )));
        }
        self.consumed = true;
        Ok(StreamView::new(self, member))
    }

    /// The current member's entire logical content.
    pub fn read_data(&mut self) -> Result<Vec<u8>> {
        let size = match &self.current {
            Some(m) => m.size as usize,
            None => 0,
        };
        let mut view = self.view()?;
        let mut out = Vec::with_capacity(size);
        view.read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn anomalies(&self) -> &[Error] {
        &self.scanner.anomalies
    }

    pub(crate) fn data_stream(&mut self) -> &mut CodecReader<R> {
        &mut self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize_path("a/b/../c"), "a/c");
        assert_eq!(normalize_path("./a//b/."), "a/b");
        assert_eq!(normalize_path("a/.."), "");
    }

    #[test]
    fn symlink_targets_are_relative() {
        let mut m = Member::new("dir/sub/link");
        m.typeflag = TypeFlag::Symlink;
        m.linkname = "../file".to_string();
        assert_eq!(link_target(&m), "dir/file");
    }

    #[test]
    fn hardlink_targets_are_absolute() {
        let mut m = Member::new("dir/link");
        m.typeflag = TypeFlag::HardLink;
        m.linkname = "other/file".to_string();
        assert_eq!(link_target(&m), "other/file");
    }

    #[test]
    fn zero_length_stream_is_unreadable() {
        let err = ArchiveReader::from_bytes(Vec::new(), ReadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Read(_)));
    }

    #[test]
    fn all_nul_record_is_an_empty_archive() {
        let image = vec![0u8; crate::block::RECORD_SIZE];
        let reader = ArchiveReader::from_bytes(image, ReadOptions::default()).unwrap();
        assert!(reader.members().is_empty());
    }

    #[test]
    fn truncated_longname_is_unreadable() {
        let mut writer = crate::writer::ArchiveWriter::new(Vec::new());
        let mut member = Member::new("n".repeat(300));
        member.size = 3;
        writer.add_file(&member, Some(&mut &b"abc"[..])).unwrap();
        let image = writer.finish().unwrap();

        // Keep the longname record and its name data, cut before the
        // real header.
        let cut = image[..2 * BLOCK_SIZE].to_vec();
        let err = ArchiveReader::from_bytes(cut, ReadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Read(_)));

        let mut stream = StreamReader::new(Cursor::new(image[..2 * BLOCK_SIZE].to_vec())).unwrap();
        assert!(matches!(stream.next_member(), Err(Error::Read(_))));
    }

    #[test]
    fn readers_format_for_diagnostics() {
        let image = vec![0u8; crate::block::RECORD_SIZE];
        let reader = ArchiveReader::from_bytes(image.clone(), ReadOptions::default()).unwrap();
        assert!(format!("{:?}", reader).starts_with("ArchiveReader"));
        let stream = StreamReader::new(Cursor::new(image)).unwrap();
        assert!(format!("{:?}", stream).starts_with("StreamReader"));
    }

    #[test]
    fn missing_terminator_is_truncated() {
        let member = Member::new("file");
        let block = header::encode(&member, crate::member::Dialect::Gnu, &TextCodec::default())
            .unwrap();
        let err = ArchiveReader::from_bytes(block.to_vec(), ReadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
    }

    fn sparse_archive_image() -> Vec<u8> {
        // Old-GNU sparse member: two 512-byte runs at logical offsets 0
        // and 1024, logical size 2048.
        let mut m = Member::new("sparse");
        m.typeflag = TypeFlag::GnuSparse;
        m.size = 1024; // stored bytes
        let mut block = header::encode(&m, crate::member::Dialect::Gnu, &TextCodec::default())
            .unwrap();
        let entries = [(0u64, 512u64), (1024, 512)];
        for (i, (offset, length)) in entries.iter().enumerate() {
            let at = 386 + i * 24;
            block[at..at + 12]
                .copy_from_slice(&block::format_numeric(*offset, 12, false, "offset", "gnu").unwrap());
            block[at + 12..at + 24]
                .copy_from_slice(&block::format_numeric(*length, 12, false, "length", "gnu").unwrap());
        }
        block[483..495]
            .copy_from_slice(&block::format_numeric(2048, 12, false, "realsize", "gnu").unwrap());
        let (unsigned, _) = block::checksums(&block);
        let mut chk = format!("{:06o}\0 ", unsigned).into_bytes();
        chk.truncate(8);
        block[148..156].copy_from_slice(&chk);

        let mut image = block.to_vec();
        image.extend(std::iter::repeat(b'A').take(512));
        image.extend(std::iter::repeat(b'B').take(512));
        image.extend_from_slice(&[0u8; 2 * BLOCK_SIZE]);
        image
    }

    #[test]
    fn sparse_member_expands_to_its_real_size() {
        let image = sparse_archive_image();
        let reader = ArchiveReader::from_bytes(image.clone(), ReadOptions::default()).unwrap();
        let member = &reader.members()[0];
        assert_eq!(member.size, 2048);
        assert!(member.is_sparse());
        let data = reader.read_all(member).unwrap();
        assert_eq!(data.len(), 2048);
        assert!(data[..512].iter().all(|b| *b == b'A'));
        assert!(data[512..1024].iter().all(|b| *b == 0));
        assert!(data[1024..1536].iter().all(|b| *b == b'B'));
        assert!(data[1536..].iter().all(|b| *b == 0));

        // The forward-only reader expands the same way.
        let mut stream = StreamReader::new(Cursor::new(image)).unwrap();
        stream.next_member().unwrap().unwrap();
        assert_eq!(stream.read_data().unwrap(), data);
    }

    #[test]
    fn lone_zero_block_collects_anomaly() {
        let member = Member::new("file");
        let mut image = header::encode(&member, crate::member::Dialect::Gnu, &TextCodec::default())
            .unwrap()
            .to_vec();
        image.extend_from_slice(&[0u8; BLOCK_SIZE]);
        let options = ReadOptions {
            level: ErrorLevel::Collect,
            ..ReadOptions::default()
        };
        let reader = ArchiveReader::from_bytes(image.clone(), options).unwrap();
        assert_eq!(reader.members().len(), 1);
        assert_eq!(reader.anomalies().len(), 1);

        let err = ArchiveReader::from_bytes(image, ReadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
    }
}
