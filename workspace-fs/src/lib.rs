//! Workspace-scoped filesystem policy and discovery.
//!
//! Three layers, evaluated in order by callers:
//! 1. [`path_policy`] — validate and resolve workspace-relative paths.
//! 2. [`ignore_rules`] — merged built-in + `.gitignore` + `.contextignore`
//!    patterns with gitignore matching semantics.
//! 3. [`discovery`] — recursive walk producing the indexable file set.
//!
//! All paths handed out by this crate are workspace-relative with forward
//! slashes; absolute paths never cross the crate boundary except as the
//! workspace root itself.

pub mod discovery;
pub mod errors;
pub mod ignore_rules;
pub mod path_policy;

pub use discovery::{DiscoveredFile, discover_files, is_indexable_name, looks_binary};
pub use errors::FsPolicyError;
pub use ignore_rules::IgnoreSet;
pub use path_policy::{MAX_FILE_SIZE, check_readable_size, resolve_workspace_path};
