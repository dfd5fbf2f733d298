use crate::cli::Args;
use crate::error::{GridFuseError, Result};

/// Reject inconsistent argument combinations before any mount is attempted.
pub fn validate_args(args: &Args) -> Result<()> {
    match (&args.store_root, args.memory) {
        (None, false) => Err(GridFuseError::Config(
            "A store root directory is required unless --memory is given".to_string(),
        )),
        (Some(_), true) => Err(GridFuseError::Config(
            "--memory and a store root directory are mutually exclusive".to_string(),
        )),
        _ => {
            if let Some(db) = &args.db {
                validate_namespace(db)?;
            }
            if let Some(collection) = &args.collection {
                validate_namespace(collection)?;
            }
            Ok(())
        }
    }
}

/// Database and collection names become path components of the store
/// layout, so they must be plain identifiers.
pub fn validate_namespace(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GridFuseError::Config(
            "Namespace cannot be empty".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(GridFuseError::Config(
            "Namespace cannot start with '.'".to_string(),
        ));
    }

    for c in name.chars() {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
            return Err(GridFuseError::Config(format!(
                "Namespace cannot contain '{}'",
                c
            )));
        }
    }

    Ok(())
}
