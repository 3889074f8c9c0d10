pub mod file;
pub mod transfer;

pub use file::{FileBlob, FileKind, FileMeta};
pub use transfer::{FileTransfer, TransferDirection, TransferState};
