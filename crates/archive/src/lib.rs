//! Backup archives.
//!
//! A backup is a tar file, optionally gzip or bzip2 compressed, holding one
//! entry per record. Entries are named `<database>/<unique id> <record type>`
//! with the unique ID in lowercase hex, and the entry body is the raw record
//! payload. Records of one database are stored contiguously, in the order
//! they were read off the device.
//!
//! [`ArchiveWriter`] is a [`RecordSink`](handheld_record::RecordSink) that
//! produces such a file; [`ArchiveReader`] opens one and hands out an
//! [`ArchiveSource`] to read it back.

mod compression;
mod entry;
pub mod error;
mod reader;
mod writer;

pub use crate::compression::Compression;
pub use crate::reader::{ArchiveReader, ArchiveSource, count_records, database_counts};
pub use crate::writer::ArchiveWriter;
