use std::fs;
use std::path::PathBuf;

use reel_format::ArchiveReader;
use tracing::debug;

use crate::error::{Error, Result};

pub fn run(path: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let reader = ArchiveReader::open(&path).map_err(|source| Error::OpenArchive {
        path: path.clone(),
        source,
    })?;

    let output = match output {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    fs::create_dir_all(&output)?;

    debug!(archive = %path.display(), dest = %output.display(), "extracting");

    reader.extract_all(&output).map_err(|source| Error::Extract {
        path: output.clone(),
        source,
    })?;

    Ok(())
}
