//! Application bits for pushflow
//!
//! Zips an application directory the way the platform expects it,
//! leaving out whatever `.cfignore` lists, and fingerprints the result
//! with SHA-256 so unchanged bits are not uploaded again.

mod archive;
pub mod error;
pub mod ignore;

pub use archive::{BitsArchive, archive_path, read_droplet};
pub use error::{BitsError, Result};
pub use ignore::IgnoreRules;
