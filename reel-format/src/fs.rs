//! Filesystem boundary: deriving members from `stat` results and
//! materializing members back onto disk.

use std::ffi::CString;
use std::fs::{self, Permissions};
use std::io::{self, Read, Seek};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tracing::debug;

use crate::error::{Error, Result};
use crate::member::{Member, TypeFlag};
use crate::reader::ArchiveReader;

/// Linux `dev_t` split.
pub(crate) fn dev_major(rdev: u64) -> u32 {
    (((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff)) as u32
}

pub(crate) fn dev_minor(rdev: u64) -> u32 {
    ((rdev & 0xff) | ((rdev >> 12) & !0xff)) as u32
}

pub(crate) struct StatInfo {
    pub(crate) member: Member,
    /// Set for regular files with more than one link, so the writer can
    /// spot a second reference to the same inode.
    pub(crate) inode: Option<(u64, u64)>,
}

/// Build a member from one filesystem entry. `dereference` follows
/// symlinks and stores what they point at.
pub(crate) fn stat_member(path: &Path, arcname: &str, dereference: bool) -> Result<StatInfo> {
    let meta = if dereference {
        fs::metadata(path)?
    } else {
        fs::symlink_metadata(path)?
    };
    let file_type = meta.file_type();

    let mut member = Member::new(arcname);
    member.mode = (meta.mode() & 0o7777) as u32;
    member.uid = u64::from(meta.uid());
    member.gid = u64::from(meta.gid());
    member.mtime = meta.mtime() as f64;

    let mut inode = None;
    if file_type.is_file() {
        member.typeflag = TypeFlag::Regular;
        member.size = meta.len();
        if meta.nlink() > 1 {
            inode = Some((meta.dev(), meta.ino()));
        }
    } else if file_type.is_dir() {
        member.typeflag = TypeFlag::Directory;
    } else if file_type.is_symlink() {
        member.typeflag = TypeFlag::Symlink;
        member.linkname = fs::read_link(path)?.to_string_lossy().into_owned();
    } else if file_type.is_fifo() {
        member.typeflag = TypeFlag::Fifo;
    } else if file_type.is_char_device() {
        member.typeflag = TypeFlag::CharDevice;
        member.devmajor = dev_major(meta.rdev());
        member.devminor = dev_minor(meta.rdev());
    } else if file_type.is_block_device() {
        member.typeflag = TypeFlag::BlockDevice;
        member.devmajor = dev_major(meta.rdev());
        member.devminor = dev_minor(meta.rdev());
    } else {
        return Err(Error::Read(format!(
            "unsupported file type at {:?}",
            path
        )));
    }

    Ok(StatInfo { member, inode })
}

fn set_mtime(path: &Path, mtime: f64) -> io::Result<()> {
    if mtime < 0.0 {
        return Ok(());
    }
    let file = fs::File::open(path)?;
    file.set_modified(UNIX_EPOCH + Duration::from_secs_f64(mtime))
}

fn mkfifo(path: &Path, mode: u32) -> io::Result<()> {
    let raw = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    if unsafe { libc::mkfifo(raw.as_ptr(), mode as libc::mode_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Join a member name under `dest`, refusing components that would
/// escape it.
fn safe_join(dest: &Path, name: &str) -> PathBuf {
    let mut out = dest.to_path_buf();
    for component in Path::new(name).components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Materialize one member under `dest`. Device nodes are skipped;
    /// ownership is not restored. Directory mtimes are deferred to
    /// `extract_all`, since writing entries into a directory bumps it
    /// again.
    pub fn extract(&self, member: &Member, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        let path = safe_join(dest, &member.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match member.typeflag {
            TypeFlag::Directory => {
                fs::create_dir_all(&path)?;
                fs::set_permissions(&path, Permissions::from_mode(member.mode))?;
            }
            TypeFlag::Regular | TypeFlag::Contiguous | TypeFlag::GnuSparse => {
                let mut view = self.view(member)?;
                let mut file = fs::File::create(&path)?;
                io::copy(&mut view, &mut file)?;
                fs::set_permissions(&path, Permissions::from_mode(member.mode))?;
                set_mtime(&path, member.mtime)?;
            }
            TypeFlag::Symlink => {
                if path.symlink_metadata().is_ok() {
                    fs::remove_file(&path)?;
                }
                std::os::unix::fs::symlink(&member.linkname, &path)?;
            }
            TypeFlag::HardLink => {
                let target = safe_join(dest, &member.linkname);
                if target.exists() {
                    fs::hard_link(&target, &path)?;
                } else {
                    // Target was not extracted here; fall back to a copy
                    // of the linked member's data.
                    let mut view = self.view(member)?;
                    let mut file = fs::File::create(&path)?;
                    io::copy(&mut view, &mut file)?;
                    fs::set_permissions(&path, Permissions::from_mode(member.mode))?;
                    set_mtime(&path, member.mtime)?;
                }
            }
            TypeFlag::Fifo => {
                if path.symlink_metadata().is_ok() {
                    fs::remove_file(&path)?;
                }
                mkfifo(&path, member.mode)?;
                set_mtime(&path, member.mtime)?;
            }
            _ => {
                debug!(name = %member.name, "skipping special member on extraction");
            }
        }
        Ok(())
    }

    /// Extract every member under `dest`, directories first by virtue of
    /// archive order. Directory mtimes are restored afterwards, deepest
    /// paths first.
    pub fn extract_all(&self, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        for member in self.members() {
            self.extract(member, dest)?;
        }
        let mut dirs: Vec<&Member> = self.members().iter().filter(|m| m.is_dir()).collect();
        dirs.sort_by_key(|m| std::cmp::Reverse(m.name.len()));
        for member in dirs {
            set_mtime(&safe_join(dest, &member.name), member.mtime)?;
        }
        Ok(())
    }
}
