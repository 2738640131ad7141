//! Encode and decode one 512-byte header block per dialect.
//!
//! Field layout (offsets into the block):
//! `name[100] mode[8] uid[8] gid[8] size[12] mtime[12] chksum[8]
//! typeflag[1] linkname[100] magic[6] version[2] uname[32] gname[32]
//! devmajor[8] devminor[8] prefix[155]`. The GNU dialect reuses the
//! prefix area for atime/ctime and the old-style sparse map.

use crate::block::{self, BLOCK_SIZE};
use crate::encoding::TextCodec;
use crate::error::{Error, Result};
use crate::member::{Dialect, Member, SparseEntry, TypeFlag};

pub(crate) const LENGTH_NAME: usize = 100;
pub(crate) const LENGTH_LINK: usize = 100;
pub(crate) const LENGTH_PREFIX: usize = 155;

const MAGIC_POSIX: &[u8; 8] = b"ustar\x0000";
const MAGIC_GNU: &[u8; 8] = b"ustar  \0";

fn truncate_nul(field: &[u8]) -> &[u8] {
    match field.iter().position(|b| *b == 0) {
        Some(i) => &field[..i],
        None => field,
    }
}

/// Decode one header block into a `Member` skeleton. `offset` is the
/// block's position in the stream, used for error context and recorded
/// on the member.
pub(crate) fn decode(
    block: &[u8; BLOCK_SIZE],
    offset: u64,
    codec: &TextCodec,
) -> Result<Member> {
    let (unsigned, signed) = block::checksums(block);
    let stored = block::parse_octal(&block[148..156], offset)? as u32;
    if stored != unsigned && stored != signed {
        return Err(Error::corrupt(
            offset,
            format!("checksum mismatch (stored {}, computed {})", stored, unsigned),
        ));
    }

    let dialect = match &block[257..265] {
        m if m == MAGIC_POSIX => Dialect::Ustar,
        m if m == MAGIC_GNU => Dialect::Gnu,
        _ => Dialect::V7,
    };

    let mut typeflag = TypeFlag::from_byte(block[156]);
    let mut name = codec.decode(truncate_nul(&block[0..100]))?;
    if dialect == Dialect::Ustar && block[345] != 0 {
        let prefix = codec.decode(truncate_nul(&block[345..500]))?;
        name = format!("{}/{}", prefix, name);
    }

    // Old v7 archives mark directories with a trailing slash on a
    // regular-file header.
    if typeflag == TypeFlag::Regular && name.ends_with('/') {
        typeflag = TypeFlag::Directory;
    }
    if typeflag == TypeFlag::Directory {
        while name.ends_with('/') {
            name.pop();
        }
    }

    let size = block::parse_numeric(&block[124..136], offset)?;
    let mut member = Member::new(name);
    member.typeflag = typeflag;
    member.mode = block::parse_numeric(&block[100..108], offset)? as u32;
    member.uid = block::parse_numeric(&block[108..116], offset)?;
    member.gid = block::parse_numeric(&block[116..124], offset)?;
    member.size = size;
    member.stored_size = size;
    member.mtime = block::parse_numeric(&block[136..148], offset)? as f64;
    member.chksum = stored;
    member.linkname = codec.decode(truncate_nul(&block[157..257]))?;
    member.offset = offset;
    member.dialect = dialect;

    if dialect != Dialect::V7 {
        member.uname = codec.decode(truncate_nul(&block[265..297]))?;
        member.gname = codec.decode(truncate_nul(&block[297..329]))?;
        member.devmajor = block::parse_numeric(&block[329..337], offset)? as u32;
        member.devminor = block::parse_numeric(&block[337..345], offset)? as u32;
    }

    if typeflag == TypeFlag::GnuSparse {
        let (entries, _extended) = parse_sparse_entries(&block[386..482], offset)?;
        member.sparse = Some(entries);
        // The size field counts stored bytes; the logical length lives
        // in realsize.
        member.size = block::parse_numeric(&block[483..495], offset)?;
    }

    Ok(member)
}

/// Whether the initial sparse header announces continuation blocks.
pub(crate) fn sparse_is_extended(block: &[u8; BLOCK_SIZE]) -> bool {
    block[482] != 0
}

/// Parse a run of 24-byte (offset, numbytes) sparse pairs; an all-NUL
/// pair ends the run.
fn parse_sparse_entries(area: &[u8], offset: u64) -> Result<(Vec<SparseEntry>, bool)> {
    let mut entries = Vec::new();
    for pair in area.chunks_exact(24) {
        if block::is_zero_block(pair) {
            return Ok((entries, false));
        }
        entries.push(SparseEntry {
            offset: block::parse_numeric(&pair[0..12], offset)?,
            length: block::parse_numeric(&pair[12..24], offset)?,
        });
    }
    Ok((entries, true))
}

/// Parse one sparse continuation block: 21 pairs plus an isextended
/// flag byte.
pub(crate) fn parse_sparse_continuation(
    block: &[u8; BLOCK_SIZE],
    offset: u64,
) -> Result<(Vec<SparseEntry>, bool)> {
    let (entries, _) = parse_sparse_entries(&block[..504], offset)?;
    Ok((entries, block[504] != 0))
}

fn put(block: &mut [u8; BLOCK_SIZE], at: usize, bytes: &[u8]) {
    block[at..at + bytes.len()].copy_from_slice(bytes);
}

fn put_text(
    block: &mut [u8; BLOCK_SIZE],
    at: usize,
    width: usize,
    bytes: &[u8],
    field: &'static str,
    dialect: Dialect,
) -> Result<()> {
    if bytes.len() > width {
        return Err(Error::FieldTooLarge {
            field,
            dialect: dialect.name(),
        });
    }
    put(block, at, bytes);
    Ok(())
}

/// Split an over-length ustar name into (prefix, name) at a `/` such
/// that both halves fit their fields.
pub(crate) fn split_ustar_name(name: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut prefix_len = name.len().min(LENGTH_PREFIX + 1);
    while prefix_len > 0 && name[prefix_len - 1] != b'/' {
        prefix_len -= 1;
    }
    if prefix_len == 0 {
        return None;
    }
    let rest = &name[prefix_len..];
    let prefix = &name[..prefix_len - 1];
    if rest.is_empty() || rest.len() > LENGTH_NAME || prefix.len() > LENGTH_PREFIX {
        return None;
    }
    Some((prefix, rest))
}

/// Encode one real header block. Extension records for over-length
/// values are the extended-header handler's concern; this fails with
/// `FieldTooLarge` when a value cannot be represented directly.
pub(crate) fn encode(
    member: &Member,
    dialect: Dialect,
    codec: &TextCodec,
) -> Result<[u8; BLOCK_SIZE]> {
    let mut block = [0u8; BLOCK_SIZE];
    let dname = dialect.name();
    let base256 = dialect == Dialect::Gnu;

    let mut name = codec.encode(&member.name)?;
    if member.typeflag == TypeFlag::Directory && !name.ends_with(b"/") {
        name.push(b'/');
    }

    if name.len() <= LENGTH_NAME {
        put(&mut block, 0, &name);
    } else if dialect == Dialect::Ustar {
        let (prefix, rest) = split_ustar_name(&name).ok_or(Error::FieldTooLarge {
            field: "name",
            dialect: dname,
        })?;
        put(&mut block, 0, rest);
        put(&mut block, 345, prefix);
    } else {
        return Err(Error::FieldTooLarge {
            field: "name",
            dialect: dname,
        });
    }

    put(
        &mut block,
        100,
        &block::format_numeric(u64::from(member.mode), 8, base256, "mode", dname)?,
    );
    put(
        &mut block,
        108,
        &block::format_numeric(member.uid, 8, base256, "uid", dname)?,
    );
    put(
        &mut block,
        116,
        &block::format_numeric(member.gid, 8, base256, "gid", dname)?,
    );
    put(
        &mut block,
        124,
        &block::format_numeric(member.size, 12, base256, "size", dname)?,
    );
    put(
        &mut block,
        136,
        &block::format_numeric(member.mtime as u64, 12, base256, "mtime", dname)?,
    );
    block[156] = member.typeflag.byte();

    let linkname = codec.encode(&member.linkname)?;
    put_text(&mut block, 157, LENGTH_LINK, &linkname, "linkname", dialect)?;

    if dialect != Dialect::V7 {
        let magic = if dialect == Dialect::Gnu {
            MAGIC_GNU
        } else {
            MAGIC_POSIX
        };
        put(&mut block, 257, magic);
        let uname = codec.encode(&member.uname)?;
        put_text(&mut block, 265, 32, &uname, "uname", dialect)?;
        let gname = codec.encode(&member.gname)?;
        put_text(&mut block, 297, 32, &gname, "gname", dialect)?;
        put(
            &mut block,
            329,
            &block::format_numeric(u64::from(member.devmajor), 8, base256, "devmajor", dname)?,
        );
        put(
            &mut block,
            337,
            &block::format_numeric(u64::from(member.devminor), 8, base256, "devminor", dname)?,
        );
    }

    let (unsigned, _) = block::checksums(&block);
    // Six octal digits, NUL, space.
    let mut chk = format!("{:06o}\0 ", unsigned & 0o777777).into_bytes();
    chk.truncate(8);
    put(&mut block, 148, &chk);

    Ok(block)
}
