use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot open archive `{}`", .path.display())]
    OpenArchive {
        path: PathBuf,
        #[source]
        source: reel_format::Error,
    },

    #[error("cannot create archive `{}`", .path.display())]
    CreateArchive {
        path: PathBuf,
        #[source]
        source: reel_format::Error,
    },

    #[error("cannot add `{}` to the archive", .path.display())]
    AddPath {
        path: PathBuf,
        #[source]
        source: reel_format::Error,
    },

    #[error("cannot extract into `{}`", .path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: reel_format::Error,
    },

    #[error("cannot finish archive `{}`", .path.display())]
    FinishArchive {
        path: PathBuf,
        #[source]
        source: reel_format::Error,
    },

    #[error("no files specified to add to the archive")]
    NoFilesSpecified,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
