//! Transparent stream compression. The archive layer never sees codec
//! framing; it reads and writes plain blocks through these wrappers.

use std::fmt;
use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";

/// Stream codec wrapped around raw archive bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Codec {
    None,
    Gzip,
    Bzip2,
}

impl Codec {
    pub const fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Gzip => "gzip",
            Codec::Bzip2 => "bzip2",
        }
    }

    /// Sniff the codec from the first bytes of a stream.
    pub(crate) fn detect(magic: &[u8]) -> Codec {
        if magic.starts_with(GZIP_MAGIC) {
            Codec::Gzip
        } else if magic.starts_with(BZIP2_MAGIC) {
            Codec::Bzip2
        } else {
            Codec::None
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::None
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reader that can look at its first bytes without consuming them, so
/// codec detection does not lose data on forward-only streams.
pub(crate) struct PeekBuf<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> PeekBuf<R> {
    pub(crate) fn new(inner: R) -> PeekBuf<R> {
        PeekBuf {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Return up to `n` upcoming bytes. Fewer are returned only if the
    /// stream ends first.
    pub(crate) fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.buf.len() - self.pos < n {
            let mut byte = [0u8; 64];
            let got = self.inner.read(&mut byte)?;
            if got == 0 {
                break;
            }
            self.buf.extend_from_slice(&byte[..got]);
        }
        let end = (self.pos + n).min(self.buf.len());
        Ok(&self.buf[self.pos..end])
    }
}

impl<R: Read> Read for PeekBuf<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = out.len().min(self.buf.len() - self.pos);
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.buf.len() {
                self.buf.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(out)
    }
}

/// Decompressing side of the codec boundary.
pub(crate) enum CodecReader<R: Read> {
    Raw(PeekBuf<R>),
    Gzip(Box<GzDecoder<PeekBuf<R>>>),
    Bzip2(Box<BzDecoder<PeekBuf<R>>>),
}

impl<R: Read> CodecReader<R> {
    /// Sniff the stream and wrap it in whatever codec its magic claims.
    pub(crate) fn auto(stream: R) -> Result<(Codec, CodecReader<R>)> {
        let mut peek = PeekBuf::new(stream);
        let codec = Codec::detect(peek.peek(3)?);
        Ok((codec, Self::wrap(peek, codec)))
    }

    /// Wrap with an explicitly requested codec. A compressed codec whose
    /// magic is absent from the stream is refused up front.
    pub(crate) fn with_codec(stream: R, codec: Codec) -> Result<CodecReader<R>> {
        let mut peek = PeekBuf::new(stream);
        if codec != Codec::None {
            let found = Codec::detect(peek.peek(3)?);
            if found != codec {
                return Err(Error::Read(format!(
                    "expected a {} stream, found {}",
                    codec, found
                )));
            }
        }
        Ok(Self::wrap(peek, codec))
    }

    fn wrap(peek: PeekBuf<R>, codec: Codec) -> CodecReader<R> {
        match codec {
            Codec::None => CodecReader::Raw(peek),
            Codec::Gzip => CodecReader::Gzip(Box::new(GzDecoder::new(peek))),
            Codec::Bzip2 => CodecReader::Bzip2(Box::new(BzDecoder::new(peek))),
        }
    }
}

impl<R: Read> fmt::Debug for CodecReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codec = match self {
            CodecReader::Raw(_) => Codec::None,
            CodecReader::Gzip(_) => Codec::Gzip,
            CodecReader::Bzip2(_) => Codec::Bzip2,
        };
        f.debug_tuple("CodecReader").field(&codec).finish()
    }
}

impl<R: Read> Read for CodecReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            CodecReader::Raw(r) => r.read(out),
            CodecReader::Gzip(r) => r.read(out),
            CodecReader::Bzip2(r) => r.read(out),
        }
    }
}

/// Compressing side. `finish` must run exactly once before the inner
/// writer is dropped, or the codec trailer never gets written.
pub(crate) enum CodecWriter<W: Write> {
    Raw(W),
    Gzip(Box<GzEncoder<W>>),
    Bzip2(Box<BzEncoder<W>>),
    Finished,
}

impl<W: Write> CodecWriter<W> {
    pub(crate) fn new(stream: W, codec: Codec) -> CodecWriter<W> {
        match codec {
            Codec::None => CodecWriter::Raw(stream),
            Codec::Gzip => {
                CodecWriter::Gzip(Box::new(GzEncoder::new(stream, flate2::Compression::default())))
            }
            Codec::Bzip2 => {
                CodecWriter::Bzip2(Box::new(BzEncoder::new(stream, bzip2::Compression::default())))
            }
        }
    }

    /// Flush codec framing and hand back the inner writer.
    pub(crate) fn finish(&mut self) -> Result<W> {
        match std::mem::replace(self, CodecWriter::Finished) {
            CodecWriter::Raw(mut w) => {
                w.flush()?;
                Ok(w)
            }
            CodecWriter::Gzip(enc) => Ok(enc.finish()?),
            CodecWriter::Bzip2(enc) => Ok(enc.finish()?),
            CodecWriter::Finished => Err(Error::Stream("codec already finished".to_string())),
        }
    }
}

impl<W: Write> Write for CodecWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            CodecWriter::Raw(w) => w.write(data),
            CodecWriter::Gzip(w) => w.write(data),
            CodecWriter::Bzip2(w) => w.write(data),
            CodecWriter::Finished => Err(io::Error::new(
                io::ErrorKind::Other,
                "write after codec finish",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWriter::Raw(w) => w.flush(),
            CodecWriter::Gzip(w) => w.flush(),
            CodecWriter::Bzip2(w) => w.flush(),
            CodecWriter::Finished => Ok(()),
        }
    }
}
