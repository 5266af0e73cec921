//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Route virtual paths to the `public`, `private`, `outside` and `dns`
//!   namespaces and enforce what each one allows.
//! - Mirror the remote hierarchy in per-namespace cache trees that are
//!   re-listed only after they have been invalidated.
//! - Emulate random-access writes over whole-object storage by staging open
//!   files locally and rewriting them on close.
//!
//! Submodules:
//! - `path`: path parsing, legality gates, open modes, backend naming
//! - `cache`: hash-keyed cache trees with validity flags
//! - `lister`: backend listings and cache repopulation
//! - `attr`: existence checks and getattr
//! - `mutation`: mkdir/rmdir/rename/symlink/readlink/delete/touch
//! - `handle`: staged file handles
//! - `settings`: the external-domain registry record
//! - `fs`: the `SafeVfs` facade
pub mod attr;
pub mod cache;
pub mod fs;
pub mod handle;
pub mod lister;
pub mod mutation;
pub mod path;
pub mod settings;
