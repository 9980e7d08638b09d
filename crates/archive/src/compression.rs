use crate::error::{Error, ErrorKind, Result};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use exn::ResultExt;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::{Read, Result as IoResult, Write};
use std::path::Path;
use std::str::FromStr;

/// Compression wrapped around the tar stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain tar (.tar)
    None,
    /// Gzip compressed tar (.tar.gz)
    #[default]
    Gzip,
    /// Bzip2 compressed tar (.tar.bz2)
    Bzip2,
}

impl Compression {
    /// Detect compression from an archive file name.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "gz" | "tgz" => Compression::Gzip,
                "bz2" | "tbz2" => Compression::Bzip2,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// File extension of an archive using this compression, without the
    /// leading dot.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "tar",
            Compression::Gzip => "tar.gz",
            Compression::Bzip2 => "tar.bz2",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
        }
    }

    pub(crate) fn wrap_reader<'a, R: Read + Send + 'a>(&self, reader: R) -> Box<dyn Read + Send + 'a> {
        match self {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
        }
    }

    pub(crate) fn wrap_writer<W: Write>(&self, writer: W) -> Encoder<W> {
        match self {
            Compression::None => Encoder::Plain(writer),
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(writer, flate2::Compression::best())),
            Compression::Bzip2 => Encoder::Bzip2(BzEncoder::new(writer, bzip2::Compression::best())),
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "tar" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Compressing writer that must be finished explicitly, so trailer write
/// failures are reported instead of being swallowed on drop.
pub(crate) enum Encoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub(crate) fn finish(self) -> Result<W> {
        match self {
            Encoder::Plain(mut writer) => {
                writer.flush().or_raise(|| ErrorKind::Io)?;
                Ok(writer)
            },
            Encoder::Gzip(encoder) => encoder.finish().or_raise(|| ErrorKind::Io),
            Encoder::Bzip2(encoder) => encoder.finish().or_raise(|| ErrorKind::Io),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        match self {
            Encoder::Plain(writer) => writer.write(buf),
            Encoder::Gzip(encoder) => encoder.write(buf),
            Encoder::Bzip2(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> IoResult<()> {
        match self {
            Encoder::Plain(writer) => writer.flush(),
            Encoder::Gzip(encoder) => encoder.flush(),
            Encoder::Bzip2(encoder) => encoder.flush(),
        }
    }
}
