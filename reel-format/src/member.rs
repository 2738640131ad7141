use std::collections::HashMap;
use std::fmt;

/// Header-format variant a member was decoded under, or that a writer
/// targets.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Dialect {
    /// Pre-POSIX v7: base fields only, names limited to 100 bytes.
    V7,
    /// POSIX.1-1988 ustar: magic, owner names, devices, prefix field.
    Ustar,
    /// GNU extensions: longname/longlink records, base-256 numerics,
    /// old-style sparse members.
    Gnu,
    /// POSIX.1-2001 pax: ustar plus extended key=value records.
    Pax,
}

impl Dialect {
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::V7 => "v7",
            Dialect::Ustar => "ustar",
            Dialect::Gnu => "gnu",
            Dialect::Pax => "pax",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::Gnu
    }
}

/// Entry type stored in the header's typeflag byte.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TypeFlag {
    Regular,
    Directory,
    HardLink,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Contiguous,
    // Extension records. The reader consumes these internally; they only
    // surface through `Member::typeflag` when a block is decoded raw.
    GnuLongName,
    GnuLongLink,
    GnuSparse,
    PaxExtended,
    PaxGlobal,
}

impl TypeFlag {
    pub(crate) fn from_byte(byte: u8) -> TypeFlag {
        match byte {
            b'0' | 0 => TypeFlag::Regular,
            b'1' => TypeFlag::HardLink,
            b'2' => TypeFlag::Symlink,
            b'3' => TypeFlag::CharDevice,
            b'4' => TypeFlag::BlockDevice,
            b'5' => TypeFlag::Directory,
            b'6' => TypeFlag::Fifo,
            b'7' => TypeFlag::Contiguous,
            b'L' => TypeFlag::GnuLongName,
            b'K' => TypeFlag::GnuLongLink,
            b'S' => TypeFlag::GnuSparse,
            b'x' => TypeFlag::PaxExtended,
            b'g' => TypeFlag::PaxGlobal,
            // Unknown vendor types carry data like a regular file.
            _ => TypeFlag::Regular,
        }
    }

    pub(crate) fn byte(self) -> u8 {
        match self {
            TypeFlag::Regular => b'0',
            TypeFlag::HardLink => b'1',
            TypeFlag::Symlink => b'2',
            TypeFlag::CharDevice => b'3',
            TypeFlag::BlockDevice => b'4',
            TypeFlag::Directory => b'5',
            TypeFlag::Fifo => b'6',
            TypeFlag::Contiguous => b'7',
            TypeFlag::GnuLongName => b'L',
            TypeFlag::GnuLongLink => b'K',
            TypeFlag::GnuSparse => b'S',
            TypeFlag::PaxExtended => b'x',
            TypeFlag::PaxGlobal => b'g',
        }
    }

}

/// One present-data run of a sparse member. Byte ranges between
/// segments read as NUL without being stored.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SparseEntry {
    pub offset: u64,
    pub length: u64,
}

/// One archive entry: the decoded header fields plus the positions
/// needed to reach its data.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub typeflag: TypeFlag,
    /// Logical data length. For sparse members this is the expanded
    /// size, which exceeds the bytes physically stored.
    pub size: u64,
    pub mtime: f64,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub uname: String,
    pub gname: String,
    pub linkname: String,
    pub devmajor: u32,
    pub devminor: u32,
    pub chksum: u32,
    /// Offset of the member's first header block in the (decompressed)
    /// stream, including any extension headers that precede the real one.
    pub offset: u64,
    /// Offset of the first data byte.
    pub data_offset: u64,
    pub dialect: Dialect,
    /// PAX key=value attributes in effect for this member (global
    /// records merged under local ones). Raw numeric override values
    /// stay inspectable here even after they are applied to the
    /// corresponding typed field.
    pub pax_headers: HashMap<String, String>,
    /// Present-data map for sparse members.
    pub sparse: Option<Vec<SparseEntry>>,
    /// Bytes physically stored in the archive (== `size` unless sparse).
    pub(crate) stored_size: u64,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Member {
        Member {
            name: name.into(),
            typeflag: TypeFlag::Regular,
            size: 0,
            mtime: 0.0,
            mode: 0o644,
            uid: 0,
            gid: 0,
            uname: String::new(),
            gname: String::new(),
            linkname: String::new(),
            devmajor: 0,
            devminor: 0,
            chksum: 0,
            offset: 0,
            data_offset: 0,
            dialect: Dialect::default(),
            pax_headers: HashMap::new(),
            sparse: None,
            stored_size: 0,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.typeflag, TypeFlag::Regular | TypeFlag::Contiguous)
    }

    pub fn is_dir(&self) -> bool {
        self.typeflag == TypeFlag::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.typeflag == TypeFlag::Symlink
    }

    pub fn is_hardlink(&self) -> bool {
        self.typeflag == TypeFlag::HardLink
    }

    pub fn is_link(&self) -> bool {
        self.is_symlink() || self.is_hardlink()
    }

    pub fn is_device(&self) -> bool {
        matches!(self.typeflag, TypeFlag::CharDevice | TypeFlag::BlockDevice)
    }

    pub fn is_fifo(&self) -> bool {
        self.typeflag == TypeFlag::Fifo
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse.is_some()
    }

    /// Bytes the member occupies in the archive after its headers.
    pub(crate) fn stored_size(&self) -> u64 {
        self.stored_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typeflag_bytes() {
        for flag in [
            TypeFlag::Regular,
            TypeFlag::HardLink,
            TypeFlag::Symlink,
            TypeFlag::CharDevice,
            TypeFlag::BlockDevice,
            TypeFlag::Directory,
            TypeFlag::Fifo,
            TypeFlag::Contiguous,
            TypeFlag::GnuLongName,
            TypeFlag::GnuLongLink,
            TypeFlag::GnuSparse,
            TypeFlag::PaxExtended,
            TypeFlag::PaxGlobal,
        ] {
            assert_eq!(TypeFlag::from_byte(flag.byte()), flag);
        }
        // Old archives store regular files with a NUL typeflag.
        assert_eq!(TypeFlag::from_byte(0), TypeFlag::Regular);
    }

    #[test]
    fn fresh_member_defaults() {
        let m = Member::new("foo");
        assert_eq!(m.typeflag, TypeFlag::Regular);
        assert_eq!(m.mode, 0o644);
        assert_eq!(m.size, 0);
        assert!(m.pax_headers.is_empty());
    }
}
