//! Purpose: Enumerate the named entries of a container and open each as a line source.
//! Exports: `Container`, `EntryInfo`.
//! Role: Bridge between a resolved local path and the per-stream cursors.
//! Invariants: A zip container holds exactly one file handle; entries read it positionally.
//! Invariants: Directory entries hold no handle between reads, so stream count is not bounded
//! by the open-file limit.
//! Invariants: Zip entries are checked against their central-directory CRC-32 at EOF.
//! Invariants: Entry order is archive order for zip, file-name order for directories.
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Crc;
use flate2::read::DeflateDecoder;
use zip::{CompressionMethod, ZipArchive};

use crate::core::error::{Error, ErrorKind};
use crate::core::format::ContainerFormat;
use crate::core::lines::{BufLines, LineSource};
use crate::core::record::Symbol;

const DIR_READ_CAPACITY: usize = 64 * 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
enum ZipMethod {
    Stored,
    Deflated,
    Unsupported(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Locator {
    Zip {
        data_start: u64,
        compressed_size: u64,
        crc32: u32,
        method: ZipMethod,
    },
    File(PathBuf),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryInfo {
    symbol: Symbol,
    name: String,
    locator: Locator,
}

impl EntryInfo {
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    format: ContainerFormat,
    archive: Option<Arc<File>>,
    entries: Vec<EntryInfo>,
}

impl Container {
    pub fn open(path: &Path, format: ContainerFormat) -> Result<Self, Error> {
        let (archive, entries) = match format {
            ContainerFormat::Zip => {
                let (file, entries) = zip_entries(path)?;
                (Some(Arc::new(file)), entries)
            }
            ContainerFormat::Directory => (None, dir_entries(path)?),
        };
        if entries.is_empty() {
            return Err(Error::new(ErrorKind::Empty)
                .with_message("container has no entries")
                .with_path(path));
        }
        Ok(Self {
            path: path.to_path_buf(),
            format,
            archive,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    pub fn open_entry(&self, entry: &EntryInfo) -> Result<Box<dyn LineSource>, Error> {
        let with_context = |err: Error| err.with_path(&self.path).with_entry(&entry.name);
        match &entry.locator {
            Locator::File(path) => Ok(Box::new(BufLines::new(BufReader::with_capacity(
                DIR_READ_CAPACITY,
                ReopeningFile::new(path.clone()),
            )))),
            Locator::Zip {
                data_start,
                compressed_size,
                crc32,
                method,
            } => {
                let archive = self.archive.as_ref().ok_or_else(|| {
                    with_context(
                        Error::new(ErrorKind::Internal)
                            .with_message("zip container lost its handle"),
                    )
                })?;
                let raw = BufReader::new(EntryRange {
                    file: Arc::clone(archive),
                    offset: *data_start,
                    remaining: *compressed_size,
                });
                match method {
                    ZipMethod::Stored => Ok(Box::new(BufLines::new(BufReader::new(
                        CrcChecked::new(raw, *crc32),
                    )))),
                    ZipMethod::Deflated => Ok(Box::new(BufLines::new(BufReader::new(
                        CrcChecked::new(DeflateDecoder::new(raw), *crc32),
                    )))),
                    ZipMethod::Unsupported(name) => Err(with_context(
                        Error::new(ErrorKind::Corrupt)
                            .with_message(format!("unsupported zip entry encoding: {name}")),
                    )),
                }
            }
        }
    }
}

/// Byte range of the shared archive file, read with positioned reads.
struct EntryRange {
    file: Arc<File>,
    offset: u64,
    remaining: u64,
}

impl Read for EntryRange {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = usize::try_from(self.remaining).map_or(buf.len(), |rem| rem.min(buf.len()));
        let read = read_at(&self.file, &mut buf[..len], self.offset)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zip entry data is truncated",
            ));
        }
        self.offset += read as u64;
        self.remaining -= read as u64;
        Ok(read)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// Plain file read by reopening at the saved offset on every fill.
struct ReopeningFile {
    path: PathBuf,
    offset: u64,
}

impl ReopeningFile {
    fn new(path: PathBuf) -> Self {
        Self { path, offset: 0 }
    }
}

impl Read for ReopeningFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let read = file.read(buf)?;
        self.offset += read as u64;
        Ok(read)
    }
}

/// Verifies the decoded bytes against the expected CRC-32 once the inner reader hits EOF.
struct CrcChecked<R> {
    inner: R,
    crc: Crc,
    expected: u32,
}

impl<R: Read> CrcChecked<R> {
    fn new(inner: R, expected: u32) -> Self {
        Self {
            inner,
            crc: Crc::new(),
            expected,
        }
    }
}

impl<R: Read> Read for CrcChecked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 && !buf.is_empty() && self.crc.sum() != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "zip entry checksum mismatch: expected {:08x}, got {:08x}",
                    self.expected,
                    self.crc.sum()
                ),
            ));
        }
        self.crc.update(&buf[..read]);
        Ok(read)
    }
}

fn zip_error(path: &Path, err: zip::result::ZipError) -> Error {
    let kind = match &err {
        zip::result::ZipError::Io(io) if io.kind() == io::ErrorKind::NotFound => {
            ErrorKind::NotFound
        }
        zip::result::ZipError::Io(_) => ErrorKind::Io,
        _ => ErrorKind::Corrupt,
    };
    Error::new(kind)
        .with_message("failed to read zip archive")
        .with_path(path)
        .with_source(err)
}

fn zip_entries(path: &Path) -> Result<(File, Vec<EntryInfo>), Error> {
    let file = File::open(path).map_err(|err| Error::from(err).with_path(path))?;
    let mut archive = ZipArchive::new(BufReader::new(&file)).map_err(|err| zip_error(path, err))?;
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|err| zip_error(path, err))?;
        let name = entry.name().to_string();
        if entry.is_dir() || is_metadata_entry(&name) {
            continue;
        }
        let method = if entry.encrypted() {
            ZipMethod::Unsupported("encrypted".to_string())
        } else {
            match entry.compression() {
                CompressionMethod::Stored => ZipMethod::Stored,
                CompressionMethod::Deflated => ZipMethod::Deflated,
                other => ZipMethod::Unsupported(format!("{other:?}")),
            }
        };
        entries.push(EntryInfo {
            symbol: Symbol::from_entry_name(&name),
            locator: Locator::Zip {
                data_start: entry.data_start(),
                compressed_size: entry.compressed_size(),
                crc32: entry.crc32(),
                method,
            },
            name,
        });
    }
    drop(archive);
    Ok((file, entries))
}

fn is_metadata_entry(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || name
            .rsplit('/')
            .next()
            .is_some_and(|base| base.starts_with('.'))
}

fn dir_entries(path: &Path) -> Result<Vec<EntryInfo>, Error> {
    let read_dir = fs::read_dir(path).map_err(|err| {
        Error::from(err)
            .with_message("failed to list directory container")
            .with_path(path)
    })?;
    let mut entries = Vec::new();
    for item in read_dir {
        let item = item.map_err(|err| Error::from(err).with_path(path))?;
        let file_type = item
            .file_type()
            .map_err(|err| Error::from(err).with_path(item.path()))?;
        let name = item.file_name().to_string_lossy().to_string();
        if !file_type.is_file() || name.starts_with('.') {
            continue;
        }
        entries.push(EntryInfo {
            symbol: Symbol::from_entry_name(&name),
            locator: Locator::File(item.path()),
            name,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
