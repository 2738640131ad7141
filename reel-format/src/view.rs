//! Extraction views: a seekable window over one member's logical data
//! for random-access archives, and a one-pass equivalent for
//! forward-only streams. Both expand sparse holes to NUL.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom};

use crate::member::{Member, SparseEntry};
use crate::reader::StreamReader;

/// One present-data run with its physical location resolved.
#[derive(Debug, Clone, Copy)]
struct Slice {
    logical: u64,
    length: u64,
    physical: u64,
}

fn resolve_slices(member: &Member) -> Vec<Slice> {
    match &member.sparse {
        Some(entries) => {
            let mut physical = member.data_offset;
            let mut slices = Vec::with_capacity(entries.len());
            for entry in entries {
                slices.push(Slice {
                    logical: entry.offset,
                    length: entry.length,
                    physical,
                });
                physical += entry.length;
            }
            slices
        }
        None => vec![Slice {
            logical: 0,
            length: member.size,
            physical: member.data_offset,
        }],
    }
}

/// Seekable view over `[0, size)` of one member. The underlying stream
/// is shared between all views of the archive, so every read re-seeks
/// before touching it.
pub struct MemberView<'a, R: Read + Seek> {
    stream: &'a RefCell<R>,
    size: u64,
    pos: u64,
    slices: Vec<Slice>,
}

impl<'a, R: Read + Seek> MemberView<'a, R> {
    pub(crate) fn new(stream: &'a RefCell<R>, member: &Member) -> MemberView<'a, R> {
        MemberView {
            stream,
            size: member.size,
            pos: 0,
            slices: resolve_slices(member),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

fn zero_fill(out: &mut [u8], n: usize) -> usize {
    for b in out[..n].iter_mut() {
        *b = 0;
    }
    n
}

impl<R: Read + Seek> Read for MemberView<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || out.is_empty() {
            // Past the logical end reads as empty, never as an error.
            return Ok(0);
        }
        let budget = (self.size - self.pos).min(out.len() as u64) as usize;

        for slice in &self.slices {
            if self.pos < slice.logical {
                // Hole before this run.
                let n = budget.min((slice.logical - self.pos) as usize);
                self.pos += n as u64;
                return Ok(zero_fill(out, n));
            }
            if self.pos < slice.logical + slice.length {
                let into = self.pos - slice.logical;
                let want = budget.min((slice.length - into) as usize);
                let mut stream = self.stream.borrow_mut();
                stream.seek(SeekFrom::Start(slice.physical + into))?;
                let n = stream.read(&mut out[..want])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "member data ends before its recorded size",
                    ));
                }
                self.pos += n as u64;
                return Ok(n);
            }
        }

        // Trailing hole.
        let n = budget;
        self.pos += n as u64;
        Ok(zero_fill(out, n))
    }
}

impl<R: Read + Seek> Seek for MemberView<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of member",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// One forward pass over the current member of a `StreamReader`. Valid
/// for exactly one read-through; there is no seeking.
pub struct StreamView<'a, R: Read> {
    reader: &'a mut StreamReader<R>,
    size: u64,
    pos: u64,
    segments: Vec<SparseEntry>,
    seg_idx: usize,
}

impl<'a, R: Read> StreamView<'a, R> {
    pub(crate) fn new(reader: &'a mut StreamReader<R>, member: Member) -> StreamView<'a, R> {
        let segments = match member.sparse.clone() {
            Some(entries) => entries,
            None => vec![SparseEntry {
                offset: 0,
                length: member.size,
            }],
        };
        StreamView {
            reader,
            size: member.size,
            pos: 0,
            segments,
            seg_idx: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<R: Read> Read for StreamView<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || out.is_empty() {
            return Ok(0);
        }
        let budget = (self.size - self.pos).min(out.len() as u64) as usize;

        while self.seg_idx < self.segments.len() {
            let seg = self.segments[self.seg_idx];
            if self.pos < seg.offset {
                let n = budget.min((seg.offset - self.pos) as usize);
                self.pos += n as u64;
                return Ok(zero_fill(out, n));
            }
            if self.pos < seg.offset + seg.length {
                let want = budget.min((seg.offset + seg.length - self.pos) as usize);
                let n = self.reader.data_stream().read(&mut out[..want])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "member data ends before its recorded size",
                    ));
                }
                self.reader.stored_left -= n as u64;
                self.pos += n as u64;
                if self.pos == seg.offset + seg.length {
                    self.seg_idx += 1;
                }
                return Ok(n);
            }
            self.seg_idx += 1;
        }

        let n = budget;
        self.pos += n as u64;
        Ok(zero_fill(out, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn dense_view(data: &[u8]) -> (RefCell<Cursor<Vec<u8>>>, Member) {
        let mut member = Member::new("m");
        member.size = data.len() as u64;
        member.data_offset = 0;
        (RefCell::new(Cursor::new(data.to_vec())), member)
    }

    #[test]
    fn sequential_read() {
        let (stream, member) = dense_view(b"hello world");
        let mut view = MemberView::new(&stream, &member);
        let mut out = Vec::new();
        view.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn end_relative_seek_lands_on_size() {
        let (stream, member) = dense_view(b"0123456789");
        let mut view = MemberView::new(&stream, &member);
        assert_eq!(view.seek(SeekFrom::End(0)).unwrap(), 10);
        let mut out = Vec::new();
        view.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());

        assert_eq!(view.seek(SeekFrom::End(-4)).unwrap(), 6);
        let mut out = Vec::new();
        view.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"6789");
    }

    #[test]
    fn reads_past_end_are_empty() {
        let (stream, member) = dense_view(b"abc");
        let mut view = MemberView::new(&stream, &member);
        view.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(view.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_before_start_rejected() {
        let (stream, member) = dense_view(b"abc");
        let mut view = MemberView::new(&stream, &member);
        assert!(view.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn sparse_holes_read_as_nul() {
        // Stored bytes are the two present runs back to back.
        let mut member = Member::new("sparse");
        member.size = 16;
        member.data_offset = 0;
        member.sparse = Some(vec![
            SparseEntry { offset: 2, length: 3 },
            SparseEntry { offset: 9, length: 2 },
        ]);
        let stream = RefCell::new(Cursor::new(b"AAABB".to_vec()));
        let mut view = MemberView::new(&stream, &member);
        let mut out = Vec::new();
        view.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"\0\0AAA\0\0\0\0BB\0\0\0\0\0");

        // Random access into a hole and into a run.
        view.seek(SeekFrom::Start(4)).unwrap();
        let mut two = [0u8; 2];
        view.read_exact(&mut two).unwrap();
        assert_eq!(&two, b"A\0");
    }

    #[test]
    fn view_reads_match_sequential_slices() {
        let data: Vec<u8> = (0..=255u8).collect();
        let (stream, member) = dense_view(&data);
        let mut view = MemberView::new(&stream, &member);
        let mut all = Vec::new();
        view.read_to_end(&mut all).unwrap();
        for start in [0u64, 1, 100, 255] {
            view.seek(SeekFrom::Start(start)).unwrap();
            let mut rest = Vec::new();
            view.read_to_end(&mut rest).unwrap();
            assert_eq!(rest, &all[start as usize..]);
        }
    }
}
