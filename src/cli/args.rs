use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gridfuse")]
#[command(
    about = "Mount a chunked, versioned object store (GridFS-style) as a FUSE filesystem",
    version
)]
pub struct Args {
    #[arg(help = "Mount point for the filesystem")]
    pub mountpoint: PathBuf,

    #[arg(help = "Store root directory (omit when using --memory)")]
    pub store_root: Option<PathBuf>,

    #[arg(long, help = "Database namespace within the store (defaults to \"test\")")]
    pub db: Option<String>,

    #[arg(
        long,
        help = "Collection namespace within the database (defaults to \"fs\")"
    )]
    pub collection: Option<String>,

    #[arg(
        long,
        help = "Mount an empty in-memory store; contents are discarded at unmount"
    )]
    pub memory: bool,

    #[arg(long, help = "Force debug logging (overrides GRIDFUSE_LOG)")]
    pub debug: bool,
}
