use std::path::PathBuf;

use reel_format::ArchiveWriter;

use crate::error::{Error, Result};

pub fn run(path: PathBuf, files: Vec<PathBuf>) -> Result<()> {
    if files.is_empty() {
        return Err(Error::NoFilesSpecified);
    }

    let mut writer = ArchiveWriter::append(&path).map_err(|source| Error::OpenArchive {
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
