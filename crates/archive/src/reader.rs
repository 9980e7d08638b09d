use crate::compression::Compression;
use crate::entry::parse_entry_name;
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use handheld_record::{Record, RecordSource};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};

type ArchiveStream = Box<dyn Read + Send>;

// Larger than any record a handheld database holds; a bigger entry size
// means the header is corrupt.
const MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// An open backup archive.
///
/// Tar entries are read in a single forward pass that borrows the archive,
/// so records are read through an [`ArchiveSource`] obtained from
/// [`records`](Self::records).
pub struct ArchiveReader {
    path: PathBuf,
    archive: tar::Archive<ArchiveStream>,
}

impl ArchiveReader {
    /// Open an archive, decompressing according to the file extension.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == IoErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(path)),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        };
        let compression = Compression::from_path(&path);
        tracing::debug!(path = %path.display(), %compression, "Opening archive");
        let archive = tar::Archive::new(compression.wrap_reader(BufReader::new(file)));
        Ok(Self { path, archive })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the records of the archive, restricted to the databases in
    /// `filter` when one is given.
    pub fn records(&mut self, filter: Option<HashSet<String>>) -> Result<ArchiveSource<'_>> {
        let entries = self.archive.entries().or_raise(|| ErrorKind::InvalidData)?;
        Ok(ArchiveSource {
            entries,
            filter,
            peeked: None,
            current: None,
            skipping: None,
            ended: false,
        })
    }
}

/// Records of an [`ArchiveReader`], in archive order.
///
/// Entries that are not regular files or whose names do not follow the
/// `<database>/<hex id> <type>` layout are skipped with a warning.
pub struct ArchiveSource<'a> {
    entries: tar::Entries<'a, ArchiveStream>,
    filter: Option<HashSet<String>>,
    peeked: Option<Record>,
    current: Option<String>,
    skipping: Option<String>,
    ended: bool,
}

impl ArchiveSource<'_> {
    /// Database of the record most recently returned.
    pub fn current_database(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Database of the record the next read will return, without consuming
    /// it. `None` once the archive is exhausted.
    pub fn peek_database(&mut self) -> Result<Option<&str>> {
        if self.peeked.is_none() {
            self.peeked = self.pull()?;
        }
        Ok(self.peeked.as_ref().map(Record::database))
    }

    /// Discard the remaining records of the current database. Reading
    /// continues with the next database in the archive.
    pub fn skip_database(&mut self) {
        let Some(database) = self.current.take() else {
            return;
        };
        tracing::warn!(%database, "Skipping remaining records of database");
        if self.peeked.as_ref().is_some_and(|record| record.database() == database) {
            self.peeked = None;
        }
        self.skipping = Some(database);
    }

    fn wanted(&self, database: &str) -> bool {
        if self.skipping.as_deref() == Some(database) {
            return false;
        }
        self.filter.as_ref().is_none_or(|filter| filter.contains(database))
    }

    fn pull(&mut self) -> Result<Option<Record>> {
        while let Some(entry) = self.entries.next() {
            let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = match entry.path() {
                Ok(path) => path.to_string_lossy().into_owned(),
                Err(_) => {
                    tracing::warn!("Skipping archive entry with unreadable name");
                    continue;
                },
            };
            let Some((database, unique_id, record_type)) = parse_entry_name(&name) else {
                tracing::warn!(%name, "Skipping malformed archive entry");
                continue;
            };
            if !self.wanted(database) {
                continue;
            }
            let size = entry.size();
            if size > MAX_PAYLOAD {
                tracing::error!(%name, size, "Archive entry claims an impossible size");
                exn::bail!(ErrorKind::InvalidData);
            }
            let mut payload = Vec::with_capacity(size as usize);
            entry.read_to_end(&mut payload).or_raise(|| ErrorKind::InvalidData)?;
            if payload.len() as u64 != size {
                tracing::error!(%name, size, read = payload.len(), "Archive entry is truncated");
                exn::bail!(ErrorKind::InvalidData);
            }
            return Ok(Some(Record::new(database, unique_id, record_type, payload)));
        }
        self.ended = true;
        Ok(None)
    }
}

impl RecordSource for ArchiveSource<'_> {
    type ErrorKind = ErrorKind;

    fn next_record(&mut self) -> std::result::Result<Option<Record>, Error> {
        let record = match self.peeked.take() {
            Some(record) => Some(record),
            None => self.pull()?,
        };
        if let Some(record) = &record
            && self.current.as_deref() != Some(record.database())
        {
            self.current = Some(record.database().to_string());
            self.skipping = None;
        }
        Ok(record)
    }

    fn end_of_stream(&self) -> bool {
        self.ended && self.peeked.is_none()
    }
}

/// Number of records in an archive, restricted to the databases in
/// `filter` when one is given.
pub fn count_records(path: impl AsRef<Path>, filter: Option<&HashSet<String>>) -> Result<u64> {
    let counts = database_counts(path)?;
    Ok(counts
        .into_iter()
        .filter(|(database, _)| filter.is_none_or(|filter| filter.contains(database)))
        .map(|(_, count)| count)
        .sum())
}

/// Number of records per database in an archive.
pub fn database_counts(path: impl AsRef<Path>) -> Result<BTreeMap<String, u64>> {
    let mut reader = ArchiveReader::open(path)?;
    let mut source = reader.records(None)?;
    let mut counts = BTreeMap::new();
    while let Some(record) = source.next_record()? {
        *counts.entry(record.database().to_string()).or_insert(0) += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArchiveWriter;
    use handheld_record::{RecordSink, pump_all};
    use rstest::rstest;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample() -> Vec<Record> {
        vec![
            Record::new("Contacts", 1, 0, b"alice".to_vec()),
            Record::new("Contacts", 2, 0, b"bob".to_vec()),
            Record::new("Memos", 0x10, 3, b"milk".to_vec()),
            Record::new("Tasks", 0xdeadbeef, 1, Vec::new()),
        ]
    }

    fn write(path: &Path, records: Vec<Record>) {
        let mut writer = ArchiveWriter::create(path).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_all(path: &Path, filter: Option<HashSet<String>>) -> Vec<Record> {
        let mut reader = ArchiveReader::open(path).unwrap();
        let mut source = reader.records(filter).unwrap();
        let mut records = Vec::new();
        while let Some(record) = source.next_record().unwrap() {
            records.push(record);
        }
        assert!(source.end_of_stream());
        records
    }

    #[rstest]
    #[case("backup.tar")]
    #[case("backup.tar.gz")]
    #[case("backup.tar.bz2")]
    fn test_write_then_read(#[case] name: &str) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(name);
        write(&path, sample());
        assert_eq!(read_all(&path, None), sample());
    }

    #[test]
    fn test_entry_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.tar");
        write(&path, sample());
        let mut archive = tar::Archive::new(File::open(&path).unwrap());
        let entries: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                (entry.path().unwrap().to_string_lossy().into_owned(), entry.header().mode().unwrap())
            })
            .collect();
        assert_eq!(entries[0], ("Contacts/00000001 0".to_string(), 0o644));
        assert_eq!(entries[2].0, "Memos/00000010 3");
        assert_eq!(entries[3].0, "Tasks/deadbeef 1");
    }

    #[test]
    fn test_filter_and_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.tar.gz");
        write(&path, sample());
        let filter: HashSet<String> = ["Memos".to_string(), "Tasks".to_string()].into();
        let databases: Vec<_> = read_all(&path, Some(filter.clone())).iter().map(|r| r.database().to_string()).collect();
        assert_eq!(databases, vec!["Memos", "Tasks"]);
        assert_eq!(count_records(&path, Some(&filter)).unwrap(), 2);
        assert_eq!(count_records(&path, None).unwrap(), 4);
        let counts = database_counts(&path).unwrap();
        assert_eq!(counts.get("Contacts"), Some(&2));
    }

    #[test]
    fn test_skip_and_peek() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.tar");
        write(&path, sample());
        let mut reader = ArchiveReader::open(&path).unwrap();
        let mut source = reader.records(None).unwrap();
        assert_eq!(source.peek_database().unwrap(), Some("Contacts"));
        assert_eq!(source.current_database(), None);
        assert_eq!(source.next_record().unwrap().unwrap().unique_id(), 1);
        assert_eq!(source.current_database(), Some("Contacts"));
        source.skip_database();
        assert_eq!(source.peek_database().unwrap(), Some("Memos"));
        assert_eq!(source.next_record().unwrap().unwrap().database(), "Memos");
        assert_eq!(source.next_record().unwrap().unwrap().database(), "Tasks");
        assert_eq!(source.peek_database().unwrap(), None);
        assert!(source.end_of_stream());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreign.tar");
        let mut builder = tar::Builder::new(File::create(&path).unwrap());
        for (name, data) in [("README", &b"hi"[..]), ("Memos/notahexid 0", &b"x"[..]), ("Memos/0000000a 0", &b"ok"[..])] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap().flush().unwrap();
        let records = read_all(&path, None);
        assert_eq!(records, vec![Record::new("Memos", 10, 0, b"ok".to_vec())]);
    }

    #[rstest]
    #[case::impossible_size(1 << 62, 512)]
    #[case::truncated(100, 40)]
    fn test_corrupt_entry_size_is_an_error(#[case] claimed: u64, #[case] present: usize) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.tar");
        let mut header = tar::Header::new_gnu();
        header.set_path("Memos/00000001 0").unwrap();
        header.set_size(claimed);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        let mut file = File::create(&path).unwrap();
        file.write_all(header.as_bytes()).unwrap();
        file.write_all(&vec![0; present]).unwrap();
        drop(file);

        let mut reader = ArchiveReader::open(&path).unwrap();
        let mut source = reader.records(None).unwrap();
        let err = source.next_record().unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData);
        assert_eq!(*count_records(&path, None).unwrap_err(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_missing_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.tar");
        let Err(err) = ArchiveReader::open(&path) else {
            panic!("expected missing archive to fail");
        };
        assert_eq!(*err, ErrorKind::NotFound(path));
    }

    #[test]
    fn test_rejects_unstorable_database_name() {
        let dir = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::create(dir.path().join("x.tar")).unwrap();
        let err = writer.write_record(Record::new("a/b", 1, 0, vec![])).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidEntry(_)));
    }

    #[test]
    fn test_pipe_into_archive() {
        struct Fixed(std::vec::IntoIter<Record>, bool);
        impl RecordSource for Fixed {
            type ErrorKind = ErrorKind;
            fn next_record(&mut self) -> std::result::Result<Option<Record>, Error> {
                let next = self.0.next();
                self.1 = next.is_none();
                Ok(next)
            }
            fn end_of_stream(&self) -> bool {
                self.1
            }
        }
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("piped.tar.gz");
        let mut writer = ArchiveWriter::create(&path).unwrap();
        assert_eq!(pump_all(&mut Fixed(sample().into_iter(), false), &mut writer).unwrap(), 4);
        assert_eq!(writer.finish().unwrap(), 4);
        assert_eq!(read_all(&path, None).len(), 4);
    }
}
