pub mod args;
pub mod validation;

pub use args::Args;
pub use validation::{validate_args, validate_namespace};
