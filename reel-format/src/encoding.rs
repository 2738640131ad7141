//! The text/byte boundary. Every name, link target and owner string
//! crosses the format edge through one `TextCodec`, so encoded and raw
//! forms never coexist ambiguously.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Encoding {
    Utf8,
    Latin1,
    Ascii,
}

impl Encoding {
    pub const fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "latin-1",
            Encoding::Ascii => "ascii",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do with text the encoding cannot represent.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorPolicy {
    Strict,
    Replace,
    Ignore,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TextCodec {
    pub encoding: Encoding,
    pub policy: ErrorPolicy,
}

impl Default for TextCodec {
    fn default() -> Self {
        TextCodec {
            encoding: Encoding::Utf8,
            policy: ErrorPolicy::Strict,
        }
    }
}

impl TextCodec {
    pub fn new(encoding: Encoding, policy: ErrorPolicy) -> Self {
        TextCodec { encoding, policy }
    }

    /// Encode a string for a header field. `Strict` fails on the first
    /// unrepresentable character, `Replace` substitutes `?`, `Ignore`
    /// drops it.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self.encoding {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => self.map_chars(text, |c| {
                let cp = c as u32;
                (cp <= 0xff).then(|| cp as u8)
            }),
            Encoding::Ascii => self.map_chars(text, |c| c.is_ascii().then(|| c as u8)),
        }
    }

    fn map_chars<F: Fn(char) -> Option<u8>>(&self, text: &str, f: F) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len());
        for c in text.chars() {
            match f(c) {
                Some(b) => out.push(b),
                None => match self.policy {
                    ErrorPolicy::Strict => {
                        return Err(Error::Encoding {
                            what: format!("{:?}", text),
                            encoding: self.encoding.name(),
                        })
                    }
                    ErrorPolicy::Replace => out.push(b'?'),
                    ErrorPolicy::Ignore => {}
                },
            }
        }
        Ok(out)
    }

    /// Decode header-field bytes back into a string.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self.encoding {
            Encoding::Latin1 => Ok(bytes.iter().map(|b| char::from(*b)).collect()),
            Encoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => Ok(s.to_string()),
                Err(_) => match self.policy {
                    ErrorPolicy::Strict => Err(Error::Encoding {
                        what: format!("{} raw bytes", bytes.len()),
                        encoding: self.encoding.name(),
                    }),
                    ErrorPolicy::Replace => Ok(String::from_utf8_lossy(bytes).into_owned()),
                    ErrorPolicy::Ignore => Ok(bytes
                        .iter()
                        .filter(|b| b.is_ascii())
                        .map(|b| char::from(*b))
                        .collect()),
                },
            },
            Encoding::Ascii => {
                let mut out = String::with_capacity(bytes.len());
                for b in bytes {
                    if b.is_ascii() {
                        out.push(char::from(*b));
                        continue;
                    }
                    match self.policy {
                        ErrorPolicy::Strict => {
                            return Err(Error::Encoding {
                                what: format!("byte {:#04x}", b),
                                encoding: self.encoding.name(),
                            })
                        }
                        ErrorPolicy::Replace => out.push('?'),
                        ErrorPolicy::Ignore => {}
                    }
                }
                Ok(out)
            }
        }
    }
}
