use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use humansize::{file_size_opts, FileSize};
use reel_format::{ArchiveReader, Member, TypeFlag};

use crate::error::{Error, Result};

fn type_char(member: &Member) -> char {
    match member.typeflag {
        TypeFlag::Directory => 'd',
        TypeFlag::Symlink => 'l',
        TypeFlag::HardLink => 'h',
        TypeFlag::CharDevice => 'c',
        TypeFlag::BlockDevice => 'b',
        TypeFlag::Fifo => 'p',
        _ => '-',
    }
}

fn mode_string(mode: u32) -> String {
    let mut s = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

fn time_string(mtime: f64) -> String {
    Utc.timestamp_opt(mtime as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into())
}

fn owner_string(member: &Member) -> String {
    let user = if member.uname.is_empty() {
        member.uid.to_string()
    } else {
        member.uname.clone()
    };
    let group = if member.gname.is_empty() {
        member.gid.to_string()
    } else {
        member.gname.clone()
    };
    format!("{}/{}", user, group)
}

fn decorated_name(member: &Member) -> String {
    match member.typeflag {
        TypeFlag::Symlink => format!("{} -> {}", member.name, member.linkname),
        TypeFlag::HardLink => format!("{} link to {}", member.name, member.linkname),
        TypeFlag::Directory => format!("{}/", member.name),
        _ => member.name.clone(),
    }
}

pub fn run(path: PathBuf, verbose: bool) -> Result<()> {
    let reader = ArchiveReader::open(&path).map_err(|source| Error::OpenArchive {
        path: path.clone(),
        source,
    })?;

    for member in reader.members() {
        if !verbose {
            println!("{}", member.name);
            continue;
        }
        let size = if member.is_device() {
            format!("{},{}", member.devmajor, member.devminor)
        } else {
            member
                .size
                .file_size(file_size_opts::BINARY)
                .unwrap_or_else(|_| member.size.to_string())
        };
        println!(
            "{}{}  {:<12}  {:>10}  {}  {}",
            type_char(member),
            mode_string(member.mode),
            owner_string(member),
            size,
            time_string(member.mtime),
            decorated_name(member),
        );
    }
    Ok(())
}
