//! Archive writer: derives members from the filesystem, picks the
//! extension strategy for the target dialect, and owns the close
//! sequence (terminator blocks, record padding, codec finalize).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::block::{self, BLOCK_SIZE, RECORD_SIZE, ZERO_BLOCK};
use crate::compression::{Codec, CodecWriter};
use crate::encoding::TextCodec;
use crate::error::{Error, Result};
use crate::fs as fsutil;
use crate::header;
use crate::member::{Dialect, Member, TypeFlag};
use crate::pax;
use crate::reader::{ErrorLevel, Scanner};

/// Writer configuration.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub dialect: Dialect,
    pub codec: Codec,
    pub text: TextCodec,
    /// Follow hard- and symlinks and store full copies instead of link
    /// members.
    pub dereference: bool,
    /// Key=value attributes written once as a PAX global record,
    /// applying to every subsequent member.
    pub pax_global: HashMap<String, String>,
}

pub struct ArchiveWriter<W: Write> {
    stream: CodecWriter<W>,
    offset: u64,
    dialect: Dialect,
    text: TextCodec,
    dereference: bool,
    members: Vec<Member>,
    /// (device, inode) of regular files seen this session, mapped to the
    /// archive name they were first stored under.
    inodes: HashMap<(u64, u64), String>,
    /// Resolved destination path, for the self-add no-op.
    own_path: Option<PathBuf>,
    pending_global: Option<HashMap<String, String>>,
    finished: bool,
}

impl ArchiveWriter<File> {
    /// Create a fresh archive file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, WriteOptions::default())
    }

    pub fn create_with(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        // Canonicalize after create so the no-op check survives later
        // working-directory changes.
        let own_path = fs::canonicalize(path).ok();
        let mut writer = Self::from_parts(file, options, 0);
        writer.own_path = own_path;
        Ok(writer)
    }

    /// Open an existing uncompressed archive and position the cursor
    /// over its terminator, so new members extend it. A missing or
    /// empty file starts a fresh archive.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        Self::append_with(path, WriteOptions::default())
    }

    pub fn append_with(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self> {
        let path = path.as_ref();
        if options.codec != Codec::None {
            return Err(Error::Read(
                "cannot append to a compressed archive".to_string(),
            ));
        }
        let existing = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if existing == 0 {
            return Self::create_with(path, options);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut magic = [0u8; 3];
        let got = file.read(&mut magic)?;
        if Codec::detect(&magic[..got]) != Codec::None {
            return Err(Error::Read(
                "cannot append to a compressed archive".to_string(),
            ));
        }
        file.seek(SeekFrom::Start(0))?;

        // Scan to the terminator; new members overwrite it. Existing
        // members stay visible in `members()`.
        let mut scanner = Scanner::new(options.text, ErrorLevel::Raise);
        let mut existing = Vec::new();
        let mut end;
        loop {
            end = scanner.offset;
            match scanner.next_member(&mut file)? {
                Some(member) => {
                    scanner.offset += block::padded(member.stored_size());
                    file.seek(SeekFrom::Start(scanner.offset))?;
                    existing.push(member);
                }
                None => break,
            }
        }
        file.seek(SeekFrom::Start(end))?;
        debug!(offset = end, members = existing.len(), "appending to archive");

        let own_path = fs::canonicalize(path).ok();
        let mut writer = Self::from_parts(file, options, end);
        writer.own_path = own_path;
        writer.members = existing;
        Ok(writer)
    }
}

impl<W: Write> ArchiveWriter<W> {
    /// Write an archive to an arbitrary stream.
    pub fn new(stream: W) -> Self {
        Self::new_with(stream, WriteOptions::default())
    }

    pub fn new_with(stream: W, options: WriteOptions) -> Self {
        Self::from_parts(stream, options, 0)
    }

    fn from_parts(stream: W, options: WriteOptions, offset: u64) -> Self {
        ArchiveWriter {
            stream: CodecWriter::new(stream, options.codec),
            offset,
            dialect: options.dialect,
            text: options.text,
            dereference: options.dereference,
            members: Vec::new(),
            inodes: HashMap::new(),
            own_path: None,
            pending_global: if options.pax_global.is_empty() {
                None
            } else {
                Some(options.pax_global)
            },
            finished: false,
        }
    }

    /// Members written so far, with their final offsets.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Build a member from a filesystem entry without writing anything.
    /// A second regular file on an already-seen inode comes back as a
    /// hardlink to the first name, unless dereferencing.
    pub fn stat(&mut self, path: impl AsRef<Path>, arcname: &str) -> Result<Member> {
        let info = fsutil::stat_member(path.as_ref(), arcname, self.dereference)?;
        let mut member = info.member;
        // Dereferencing stores every path as an independent copy, so
        // inode tracking is off entirely.
        if !self.dereference {
            if let Some(inode) = info.inode {
                if let Some(first) = self.inodes.get(&inode) {
                    if first != &member.name {
                        member.typeflag = TypeFlag::HardLink;
                        member.linkname = first.clone();
                        member.size = 0;
                    }
                } else {
                    self.inodes.insert(inode, member.name.clone());
                }
            }
        }
        Ok(member)
    }

    /// Add a filesystem entry under a name derived from its path.
    /// Directories recurse in sorted order.
    pub fn add(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let arcname = default_arcname(path);
        self.add_as(path, &arcname)
    }

    pub fn add_as(&mut self, path: impl AsRef<Path>, arcname: &str) -> Result<()> {
        let path = path.as_ref();
        if let (Some(own), Ok(resolved)) = (&self.own_path, fs::canonicalize(path)) {
            if own == &resolved {
                debug!(path = %path.display(), "skipping the archive's own file");
                return Ok(());
            }
        }

        let member = self.stat(path, arcname)?;
        match member.typeflag {
            TypeFlag::Regular => {
                let mut file = File::open(path)?;
                self.add_file(&member, Some(&mut file))
            }
            TypeFlag::Directory => {
                self.add_file::<File>(&member, None)?;
                let mut entries: Vec<_> = fs::read_dir(path)?
                    .collect::<std::io::Result<Vec<_>>>()?
                    .into_iter()
                    .map(|e| e.path())
                    .collect();
                entries.sort();
                for entry in entries {
                    let name = entry
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    self.add_as(&entry, &format!("{}/{}", arcname, name))?;
                }
                Ok(())
            }
            _ => self.add_file::<File>(&member, None),
        }
    }

    /// Write one member: extension records as the dialect demands, the
    /// real header, then exactly `member.size` bytes of data, padded to
    /// a block boundary.
    pub fn add_file<D: Read>(&mut self, member: &Member, data: Option<&mut D>) -> Result<()> {
        self.flush_global()?;

        let (ext, adjusted) = pax::build_extensions(member, self.dialect, &self.text)?;
        let start = self.offset;
        self.stream.write_all(&ext)?;
        self.offset += ext.len() as u64;

        let block = header::encode(&adjusted, self.dialect, &self.text)?;
        self.stream.write_all(&block)?;
        self.offset += BLOCK_SIZE as u64;

        let mut written = member.clone();
        written.offset = start;
        written.data_offset = self.offset;
        written.dialect = self.dialect;

        if member.size > 0 {
            let source = data.ok_or_else(|| {
                Error::Read(format!(
                    "member {:?} declares {} data bytes but no source was given",
                    member.name, member.size
                ))
            })?;
            self.copy_exact(source, member.size)?;
            self.offset += member.size;
            self.offset += block::write_padding(&mut self.stream, member.size)?;
        }

        debug!(name = %written.name, size = written.size, offset = written.offset, "wrote member");
        self.members.push(written);
        Ok(())
    }

    fn flush_global(&mut self) -> Result<()> {
        if let Some(headers) = self.pending_global.take() {
            let record = pax::render_global(&headers)?;
            self.stream.write_all(&record)?;
            self.offset += record.len() as u64;
        }
        Ok(())
    }

    fn copy_exact<D: Read>(&mut self, source: &mut D, size: u64) -> Result<()> {
        let mut buf = [0u8; 8 * 1024];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let got = source.read(&mut buf[..want])?;
            if got == 0 {
                return Err(Error::Truncated(format!(
                    "data source ended with {} bytes outstanding",
                    remaining
                )));
            }
            self.stream.write_all(&buf[..got])?;
            remaining -= got as u64;
        }
        Ok(())
    }

    /// Close the archive: two terminator blocks, NUL padding out to the
    /// record boundary, then codec finalize. Runs exactly once; drop
    /// calls it if the caller did not. Returns the underlying stream.
    pub fn finish(mut self) -> Result<W> {
        match self.finish_inner()? {
            Some(inner) => Ok(inner),
            None => Err(Error::Stream("archive already finished".to_string())),
        }
    }

    fn finish_inner(&mut self) -> Result<Option<W>> {
        if self.finished {
            return Ok(None);
        }
        self.finished = true;

        self.stream.write_all(&ZERO_BLOCK)?;
        self.stream.write_all(&ZERO_BLOCK)?;
        self.offset += 2 * BLOCK_SIZE as u64;

        let remainder = self.offset % RECORD_SIZE as u64;
        if remainder > 0 {
            let mut pad = RECORD_SIZE as u64 - remainder;
            while pad > 0 {
                let n = pad.min(BLOCK_SIZE as u64) as usize;
                self.stream.write_all(&ZERO_BLOCK[..n])?;
                pad -= n as u64;
            }
            self.offset += RECORD_SIZE as u64 - remainder;
        }

        Ok(Some(self.stream.finish()?))
    }
}

impl<W: Write> Drop for ArchiveWriter<W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(error) = self.finish_inner() {
                debug!(%error, "error while closing archive on drop");
            }
        }
    }
}

/// Archive name for a filesystem path: leading slashes and `./` are
/// dropped.
fn default_arcname(path: &Path) -> String {
    let text = path.to_string_lossy();
    let trimmed = text.trim_start_matches("./").trim_start_matches('/');
    trimmed.trim_end_matches('/').to_string()
}
