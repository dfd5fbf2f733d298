use clap::Parser;
use std::sync::Arc;

mod cli;
mod config;
mod error;
mod fs;
mod store;

use cli::Args;
use config::load_config;
use store::{LocalFsStore, MemoryStore, ObjectStore};

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> error::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        "debug".to_string()
    } else {
        std::env::var("GRIDFUSE_LOG").unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli::validate_args(&args)?;

    let config = load_config()?;
    let db = args.db.unwrap_or(config.db);
    let collection = args.collection.unwrap_or(config.collection);

    let store: Arc<dyn ObjectStore> = if args.memory {
        tracing::info!("Using in-memory store (contents discarded at unmount)");
        Arc::new(MemoryStore::new(config.chunk_size))
    } else {
        // validate_args guarantees a store root when --memory is absent
        let root = args
            .store_root
            .ok_or_else(|| error::GridFuseError::Config("Missing store root".to_string()))?
            .join(&db)
            .join(&collection);
        tracing::info!("Using store at {}", root.display());
        Arc::new(LocalFsStore::open(&root, config.chunk_size)?)
    };

    let filesystem = fs::GridFs::new(store);
    fs::mount_foreground(filesystem, &args.mountpoint)
}
