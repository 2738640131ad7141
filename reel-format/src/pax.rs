//! Extension records: GNU longname/longlink headers and PAX key=value
//! blocks. On read they buffer ahead of the member they modify; on
//! write the target dialect decides which records to synthesize.

use std::collections::HashMap;

use crate::block;
use crate::encoding::{ErrorPolicy, TextCodec};
use crate::error::{Error, Result};
use crate::header::{self, LENGTH_LINK, LENGTH_NAME};
use crate::member::{Dialect, Member, TypeFlag};

/// Name carried by GNU longname/longlink records.
pub(crate) const GNU_LONGLINK_NAME: &str = "././@LongLink";
/// Name carried by PAX extended-header records.
pub(crate) const PAX_HEADER_NAME: &str = "././@PaxHeader";

/// Extension content buffered while scanning, waiting for the real
/// header it applies to.
#[derive(Debug, Default)]
pub(crate) struct PendingExt {
    pub(crate) longname: Option<Vec<u8>>,
    pub(crate) longlink: Option<Vec<u8>>,
    pub(crate) pax: Option<HashMap<String, String>>,
    /// Offset of the first extension header in the sequence; the real
    /// member reports this as its own offset.
    pub(crate) first_offset: Option<u64>,
}

impl PendingExt {
    pub(crate) fn is_empty(&self) -> bool {
        self.longname.is_none() && self.longlink.is_none() && self.pax.is_none()
    }

    pub(crate) fn note_offset(&mut self, offset: u64) {
        self.first_offset.get_or_insert(offset);
    }

    /// Fold the buffered content into the member that follows it.
    pub(crate) fn apply(
        self,
        member: &mut Member,
        global: &HashMap<String, String>,
        codec: &TextCodec,
    ) -> Result<()> {
        if let Some(raw) = self.longname {
            member.name = codec.decode(trim_nul(&raw))?;
        }
        if let Some(raw) = self.longlink {
            member.linkname = codec.decode(trim_nul(&raw))?;
        }

        let mut merged = global.clone();
        if let Some(local) = self.pax {
            merged.extend(local);
        }
        if !merged.is_empty() {
            apply_pax(member, &merged, codec)?;
            member.pax_headers = merged;
        }

        if let Some(offset) = self.first_offset {
            member.offset = offset;
        }
        Ok(())
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(i) => &bytes[..i],
        None => bytes,
    }
}

/// Re-encode a PAX UTF-8 value through the archive's text codec, so the
/// surfaced string matches what the binary fields would have carried.
fn transcode(value: &str, codec: &TextCodec) -> Result<String> {
    let bytes = codec.encode(value)?;
    codec.decode(&bytes)
}

fn apply_pax(
    member: &mut Member,
    headers: &HashMap<String, String>,
    codec: &TextCodec,
) -> Result<()> {
    let offset = member.offset;
    let numeric = |key: &str, value: &str| -> Result<u64> {
        value
            .parse::<u64>()
            .map_err(|_| Error::corrupt(offset, format!("malformed pax {} value", key)))
    };
    let float = |key: &str, value: &str| -> Result<f64> {
        value
            .parse::<f64>()
            .map_err(|_| Error::corrupt(offset, format!("malformed pax {} value", key)))
    };

    for (key, value) in headers {
        match key.as_str() {
            "path" => member.name = transcode(value, codec)?,
            "linkpath" => member.linkname = transcode(value, codec)?,
            "uname" => member.uname = transcode(value, codec)?,
            "gname" => member.gname = transcode(value, codec)?,
            "uid" => member.uid = numeric(key, value)?,
            "gid" => member.gid = numeric(key, value)?,
            "size" => {
                let size = numeric(key, value)?;
                member.size = size;
                member.stored_size = size;
            }
            "mtime" => member.mtime = float(key, value)?,
            // atime/ctime stay in the attribute map only.
            _ => {}
        }
    }
    Ok(())
}

/// Parse the body of a PAX extended header: a sequence of
/// `"<len> key=value\n"` records. Trailing NUL padding is ignored.
pub(crate) fn parse_pax_records(data: &[u8], offset: u64) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    let mut pos = 0usize;
    while pos < data.len() && data[pos] != 0 {
        let rest = &data[pos..];
        let space = rest
            .iter()
            .position(|b| *b == b' ')
            .ok_or_else(|| Error::corrupt(offset, "malformed pax record length"))?;
        let length: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::corrupt(offset, "malformed pax record length"))?;
        if length <= space + 1 || length > rest.len() {
            return Err(Error::corrupt(offset, "pax record length out of bounds"));
        }
        let record = &rest[space + 1..length];
        if record.last() != Some(&b'\n') {
            return Err(Error::corrupt(offset, "pax record missing terminator"));
        }
        let record = &record[..record.len() - 1];
        let eq = record
            .iter()
            .position(|b| *b == b'=')
            .ok_or_else(|| Error::corrupt(offset, "pax record missing separator"))?;
        let key = std::str::from_utf8(&record[..eq])
            .map_err(|_| Error::corrupt(offset, "pax key is not utf-8"))?;
        let value = std::str::from_utf8(&record[eq + 1..])
            .map_err(|_| Error::corrupt(offset, "pax value is not utf-8"))?;
        headers.insert(key.to_string(), value.to_string());
        pos += length;
    }
    Ok(headers)
}

fn decimal_len(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Render PAX records: each entry's length prefix counts the entire
/// record including itself.
fn render_pax_records(headers: &HashMap<String, String>) -> Vec<u8> {
    let mut keys: Vec<&String> = headers.keys().collect();
    keys.sort();
    let mut out = Vec::new();
    for key in keys {
        let value = &headers[key];
        let body = 1 + key.len() + 1 + value.len() + 1; // " key=value\n"
        let mut total = body + 1;
        while total != body + decimal_len(total) {
            total = body + decimal_len(total);
        }
        out.extend_from_slice(format!("{} ", total).as_bytes());
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    out
}

/// Render one synthetic extension record: its header block followed by
/// block-padded data.
fn render_record(name: &str, typeflag: TypeFlag, data: &[u8]) -> Result<Vec<u8>> {
    let mut header = Member::new(name);
    header.typeflag = typeflag;
    header.size = data.len() as u64;
    let dialect = match typeflag {
        TypeFlag::GnuLongName | TypeFlag::GnuLongLink => Dialect::Gnu,
        _ => Dialect::Pax,
    };
    let mut out = header::encode(&header, dialect, &TextCodec::default())?.to_vec();
    out.extend_from_slice(data);
    let pad = block::padded(data.len() as u64) - data.len() as u64;
    out.resize(out.len() + pad as usize, 0);
    Ok(out)
}

/// Render a PAX global record ('g' typeflag).
pub(crate) fn render_global(headers: &HashMap<String, String>) -> Result<Vec<u8>> {
    render_record(
        PAX_HEADER_NAME,
        TypeFlag::PaxGlobal,
        &render_pax_records(headers),
    )
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Decide the extension strategy for one member under the writer's
/// dialect. Returns the extension bytes to emit before the real header
/// and the member adjusted so that `header::encode` can represent it.
pub(crate) fn build_extensions(
    member: &Member,
    dialect: Dialect,
    codec: &TextCodec,
) -> Result<(Vec<u8>, Member)> {
    match dialect {
        Dialect::Gnu => build_gnu(member, codec),
        Dialect::Pax => build_pax(member, codec),
        // v7 and plain ustar have no extension mechanism; over-length
        // values fail in the header codec.
        Dialect::V7 | Dialect::Ustar => Ok((Vec::new(), member.clone())),
    }
}

fn effective_name_len(member: &Member, codec: &TextCodec) -> Result<usize> {
    let mut len = codec.encode(&member.name)?.len();
    if member.typeflag == TypeFlag::Directory && !member.name.ends_with('/') {
        len += 1;
    }
    Ok(len)
}

fn build_gnu(member: &Member, codec: &TextCodec) -> Result<(Vec<u8>, Member)> {
    let mut out = Vec::new();
    let mut adjusted = member.clone();

    if effective_name_len(member, codec)? > LENGTH_NAME {
        let mut data = codec.encode(&member.name)?;
        if member.typeflag == TypeFlag::Directory && !member.name.ends_with('/') {
            data.push(b'/');
        }
        data.push(0);
        out.extend(render_record(
            GNU_LONGLINK_NAME,
            TypeFlag::GnuLongName,
            &data,
        )?);
        adjusted.name = truncate_str(&member.name, LENGTH_NAME);
    }
    if codec.encode(&member.linkname)?.len() > LENGTH_LINK {
        let mut data = codec.encode(&member.linkname)?;
        data.push(0);
        out.extend(render_record(
            GNU_LONGLINK_NAME,
            TypeFlag::GnuLongLink,
            &data,
        )?);
        adjusted.linkname = truncate_str(&member.linkname, LENGTH_LINK);
    }
    Ok((out, adjusted))
}

fn build_pax(member: &Member, codec: &TextCodec) -> Result<(Vec<u8>, Member)> {
    let mut pax = member.pax_headers.clone();
    let mut adjusted = member.clone();

    let text_fields: [(&'static str, &str, usize); 4] = [
        ("path", &member.name, LENGTH_NAME),
        ("linkpath", &member.linkname, LENGTH_LINK),
        ("uname", &member.uname, 32),
        ("gname", &member.gname, 32),
    ];
    for (key, value, length) in text_fields {
        if pax.contains_key(key) {
            continue;
        }
        // Strict encoding failures surface here rather than being
        // papered over by a pax record.
        if codec.policy == ErrorPolicy::Strict {
            codec.encode(value)?;
        }
        if !value.is_ascii() || value.len() > length {
            pax.insert(key.to_string(), value.to_string());
        }
    }

    let number_fields: [(&'static str, u64, u32); 3] = [
        ("uid", member.uid, 7),
        ("gid", member.gid, 7),
        ("size", member.size, 11),
    ];
    for (key, value, digits) in number_fields {
        if pax.contains_key(key) {
            zero_field(&mut adjusted, key);
            continue;
        }
        if value >= 8u64.saturating_pow(digits) {
            pax.insert(key.to_string(), value.to_string());
            zero_field(&mut adjusted, key);
        }
    }
    if !pax.contains_key("mtime") {
        if member.mtime.fract() != 0.0 || member.mtime >= 8f64.powi(11) || member.mtime < 0.0 {
            pax.insert("mtime".to_string(), format_pax_float(member.mtime));
            adjusted.mtime = 0.0;
        }
    } else {
        adjusted.mtime = 0.0;
    }

    // The real header keeps a representable fallback; pax values win on
    // read.
    adjusted.name = truncate_str(&adjusted.name, LENGTH_NAME);
    adjusted.linkname = truncate_str(&adjusted.linkname, LENGTH_LINK);
    adjusted.uname = truncate_str(&adjusted.uname, 32);
    adjusted.gname = truncate_str(&adjusted.gname, 32);

    let mut out = Vec::new();
    if !pax.is_empty() {
        out = render_record(
            PAX_HEADER_NAME,
            TypeFlag::PaxExtended,
            &render_pax_records(&pax),
        )?;
    }
    Ok((out, adjusted))
}

fn zero_field(member: &mut Member, key: &str) {
    match key {
        "uid" => member.uid = 0,
        "gid" => member.gid = 0,
        "size" => member.size = 0,
        _ => {}
    }
}

fn format_pax_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use crate::encoding::{Encoding, ErrorPolicy};

    #[test]
    fn pax_record_round_trip() {
        let mut headers = HashMap::new();
        headers.insert("path".to_string(), "foo/bar".to_string());
        headers.insert("uid".to_string(), "123".to_string());
        headers.insert("VENDOR.umlauts".to_string(), "ÄÖÜäöüß".to_string());
        let rendered = render_pax_records(&headers);
        let parsed = parse_pax_records(&rendered, 0).unwrap();
        assert_eq!(parsed, headers);
    }

    #[test]
    fn pax_record_length_counts_itself() {
        let mut headers = HashMap::new();
        headers.insert("a".to_string(), "b".to_string());
        let rendered = render_pax_records(&headers);
        // "6 a=b\n"
        assert_eq!(rendered, b"6 a=b\n");
    }

    #[test]
    fn malformed_pax_rejected() {
        assert!(parse_pax_records(b"notanumber a=b\n", 0).is_err());
        assert!(parse_pax_records(b"99 a=b\n", 0).is_err());
        assert!(parse_pax_records(b"6 a:b\n", 0).is_err());
    }

    #[test]
    fn numeric_overrides_apply() {
        let mut member = Member::new("old");
        member.uid = 1;
        member.size = 512;
        member.stored_size = 512;
        let mut headers = HashMap::new();
        headers.insert("uid".to_string(), "123".to_string());
        headers.insert("size".to_string(), "7011".to_string());
        headers.insert("mtime".to_string(), "1041808783.0".to_string());
        apply_pax(&mut member, &headers, &TextCodec::default()).unwrap();
        assert_eq!(member.uid, 123);
        assert_eq!(member.size, 7011);
        assert_eq!(member.stored_size, 7011);
        assert_eq!(member.mtime, 1041808783.0);
    }

    #[test]
    fn user_pax_headers_take_priority() {
        let mut member = Member::new("äöü");
        member
            .pax_headers
            .insert("path".to_string(), "foo".to_string());
        let codec = TextCodec::new(Encoding::Utf8, ErrorPolicy::Strict);
        let (ext, adjusted) = build_pax(&member, &codec).unwrap();
        assert!(!ext.is_empty());
        let parsed = parse_pax_records(&ext[BLOCK_SIZE..], 0).unwrap();
        assert_eq!(parsed.get("path").map(String::as_str), Some("foo"));
        assert_eq!(adjusted.name, "äöü");
    }

    #[test]
    fn gnu_longname_threshold() {
        let short = Member::new("x".repeat(100));
        let codec = TextCodec::default();
        let (ext, _) = build_gnu(&short, &codec).unwrap();
        assert!(ext.is_empty());

        let long = Member::new("x".repeat(101));
        let (ext, adjusted) = build_gnu(&long, &codec).unwrap();
        // Header block plus one data block for 102 bytes of name + NUL.
        assert_eq!(ext.len(), BLOCK_SIZE + BLOCK_SIZE);
        assert_eq!(ext[156], b'L');
        assert_eq!(adjusted.name.len(), 100);
    }

    #[test]
    fn pax_overflow_uid_goes_to_record() {
        let mut member = Member::new("name");
        member.uid = 8u64.pow(8); // too large for the octal field
        let (ext, adjusted) = build_pax(&member, &TextCodec::default()).unwrap();
        let parsed = parse_pax_records(&ext[BLOCK_SIZE..], 0).unwrap();
        assert_eq!(parsed.get("uid").map(String::as_str), Some("16777216"));
        assert_eq!(adjusted.uid, 0);
    }
}
