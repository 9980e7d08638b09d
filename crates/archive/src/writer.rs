use crate::compression::{Compression, Encoder};
use crate::entry::entry_name;
use crate::error::{Error, ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use handheld_record::{Record, RecordSink};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// Writes records into a new backup archive.
///
/// Nothing is guaranteed to be on disk until [`finish`](Self::finish)
/// returns; an unfinished archive is left truncated.
pub struct ArchiveWriter {
    path: PathBuf,
    builder: tar::Builder<Encoder<BufWriter<File>>>,
    mtime: u64,
    written: u64,
}

impl ArchiveWriter {
    /// Create (or truncate) an archive, compressed according to the file
    /// extension of `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let compression = Compression::from_path(path.as_ref());
        Self::create_with(path, compression)
    }

    pub fn create_with(path: impl AsRef<Path>, compression: Compression) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        let file = File::create(&path).or_raise(|| ErrorKind::Io)?;
        tracing::info!(path = %path.display(), %compression, "Creating archive");
        let builder = tar::Builder::new(compression.wrap_writer(BufWriter::new(file)));
        Ok(Self {
            path,
            builder,
            mtime: UtcDateTime::now().unix_timestamp().max(0) as u64,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write the tar trailer and flush everything to disk, returning the
    /// number of records stored.
    pub fn finish(self) -> Result<u64> {
        let encoder = self.builder.into_inner().or_raise(|| ErrorKind::Io)?;
        let buffered = encoder.finish()?;
        let file = buffered.into_inner().map_err(|err| err.into_error()).or_raise(|| ErrorKind::Io)?;
        file.sync_all().or_raise(|| ErrorKind::Io)?;
        tracing::info!(path = %self.path.display(), records = self.written, "Archive complete");
        Ok(self.written)
    }
}

impl RecordSink for ArchiveWriter {
    type ErrorKind = ErrorKind;

    fn write_record(&mut self, record: Record) -> std::result::Result<(), Error> {
        let name = entry_name(record.database(), record.unique_id(), record.record_type())
            .ok_or_raise(|| ErrorKind::InvalidEntry(format!("bad database name {:?}", record.database())))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(record.payload().len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        self.builder.append_data(&mut header, &name, record.payload()).or_raise(|| ErrorKind::Io)?;
        self.written += 1;
        tracing::trace!(%name, "Archived record");
        Ok(())
    }
}
