use std::path::PathBuf;

use reel_format::{Codec, Dialect};
use structopt::clap::AppSettings::*;
use structopt::StructOpt;

mod commands;
mod error;

#[derive(Debug)]
struct ParseCodecError(String);

impl std::error::Error for ParseCodecError {}

impl std::fmt::Display for ParseCodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown compression codec: {}", self.0)
    }
}

fn parse_codec(src: &str) -> std::result::Result<Codec, ParseCodecError> {
    let codec = match src {
        "none" => Codec::None,
        "gz" | "gzip" => Codec::Gzip,
        "bz2" | "bzip2" => Codec::Bzip2,
        _ => return Err(ParseCodecError(src.to_string())),
    };
    Ok(codec)
}

#[derive(Debug)]
struct ParseDialectError(String);

impl std::error::Error for ParseDialectError {}

impl std::fmt::Display for ParseDialectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown header dialect: {}", self.0)
    }
}

fn parse_dialect(src: &str) -> std::result::Result<Dialect, ParseDialectError> {
    let dialect = match src {
        "v7" => Dialect::V7,
        "ustar" => Dialect::Ustar,
        "gnu" => Dialect::Gnu,
        "pax" | "posix" => Dialect::Pax,
        _ => return Err(ParseDialectError(src.to_string())),
    };
    Ok(dialect)
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "c", visible_alias = "create", about = "Create a new archive")]
    Create {
        #[structopt(
            short = "z",
            long,
            parse(try_from_str = parse_codec),
            default_value = "none",
            help = "Stream compression: none, gzip or bzip2"
        )]
        codec: Codec,

        #[structopt(
            short = "d",
            long,
            parse(try_from_str = parse_dialect),
            default_value = "gnu",
            help = "Header dialect: v7, ustar, gnu or pax"
        )]
        dialect: Dialect,

        #[structopt(long, help = "Follow links and store full copies")]
        dereference: bool,

        #[structopt(name = "archive", parse(from_os_str), help = "Path to the archive")]
        path: PathBuf,
    },

    #[structopt(
        name = "a",
        visible_alias = "append",
        about = "Append files to an existing archive"
    )]
    Append {
        #[structopt(name = "archive", parse(from_os_str), help = "Path to the archive")]
        path: PathBuf,
    },

    #[structopt(name = "l", visible_alias = "list", about = "List members of an archive")]
    List {
        #[structopt(name = "archive", parse(from_os_str), help = "Path to the archive")]
        path: PathBuf,
    },

    #[structopt(
        name = "x",
        visible_alias = "extract",
        about = "Extract members of an archive"
    )]
    Extract {
        #[structopt(
            short = "o",
            long,
            parse(from_os_str),
            help = "Destination directory [default: current directory]"
        )]
        output: Option<PathBuf>,

        #[structopt(name = "archive", parse(from_os_str), help = "Path to the archive")]
        path: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "reel",
    about = "Create, list and extract tape archives.",
    settings = &[SubcommandRequiredElseHelp, DisableHelpSubcommand, VersionlessSubcommands],
    usage = "reel (a|c|l|x) [FLAGS|OPTIONS] <archive> [files]..."
)]
struct CliOpts {
    #[structopt(short, long, help = "Show verbose output", global = true)]
    verbose: bool,

    #[structopt(subcommand)]
    cmd: Commands,

    #[structopt(
        name = "files",
        parse(from_os_str),
        help = "Files and directories to add to an archive",
        global = true
    )]
    selected_files: Vec<PathBuf>,
}

fn main() {
    let opts = CliOpts::from_args();

    tracing_subscriber::fmt()
        .with_max_level(if opts.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    let result = match opts.cmd {
        Commands::Create {
            codec,
            dialect,
            dereference,
            path,
        } => commands::create(path, opts.selected_files, codec, dialect, dereference),
        Commands::Append { path } => commands::append(path, opts.selected_files),
        Commands::List { path } => commands::list(path, opts.verbose),
        Commands::Extract { output, path } => commands::extract(path, output),
    };

    if let Err(error) = result {
        eprintln!("error: {}", error);
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}
