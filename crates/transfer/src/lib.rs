//! Transport backends for the relay.
//!
//! One [`TransferService`] implementation per transport: SSH/SCP via the
//! platform `scp`/`ssh` binaries, SMB via the OS redirector (local-semantics
//! copy onto a UNC path or mount point). Both share the same pipeline:
//! validate, derive the destination, resolve conflicts, execute, verify by
//! size, then archive or delete the source.

mod conflict;
mod disk;
mod error;
mod exec;
mod result;
mod service;
mod smb;
mod ssh;

pub use conflict::{resolve_local_conflict, stamped_name};
pub use disk::check_available_space;
pub use error::TransferError;
pub use exec::{CommandOutput, CommandRunner, CommandSpec, SystemRunner, redacted_args};
pub use result::TransferResult;
pub use service::{TransferService, create_service};
pub use smb::SmbTransfer;
pub use ssh::SshTransfer;
