use std::path::PathBuf;

use reel_format::{ArchiveWriter, Codec, Dialect, WriteOptions};

use crate::error::{Error, Result};

pub fn run(
    path: PathBuf,
    files: Vec<PathBuf>,
    codec: Codec,
    dialect: Dialect,
    dereference: bool,
) -> Result<()> {
    if files.is_empty() {
        return Err(Error::NoFilesSpecified);
    }

    let options = WriteOptions {
        codec,
        dialect,
        dereference,
        ..WriteOptions::default()
    };
    let mut writer =
        ArchiveWriter::create_with(&path, options).map_err(|source| Error::CreateArchive {
            path: path.clone(),
            source,
        })?;

    for file in files {
        writer.add(&file).map_err(|source| Error::AddPath {
            path: file.clone(),
            source,
        })?;
    }

    writer
        .finish()
        .map_err(|source| Error::FinishArchive { path, source })?;
    Ok(())
}
