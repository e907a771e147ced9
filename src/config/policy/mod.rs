//! External policy inputs loaded by the validator

pub mod list_file;

pub use list_file::{load_list_file, parse_list};
