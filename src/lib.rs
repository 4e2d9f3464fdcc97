//! # zipcat: random-access ZIP reading and streaming ZIP writing
//!
//! `zipcat` reads and writes ZIP archives, including the ZIP64 size/offset
//! extension, UTF-8 and Code Page 437 filenames, `stored`/`deflate`/`bzip2`
//! compression (plus write-only recognition of `lzma`, matching the
//! long-standing behavior of the reference `zipfile` implementation this
//! crate's wire-format handling is modeled on), and the legacy PKWARE
//! stream-cipher encryption scheme found in older archives.
//!
//! ## Quick start
//!
//! ### Reading a ZIP file
//!
//! ```no_run
//! use zipcat::{OpenOptions, ZipArchive};
//! use std::io::Read;
//!
//! let mut archive = ZipArchive::open("archive.zip", OpenOptions::new())?;
//! for entry in archive.entries().to_vec() {
//!     println!("{}: {} bytes", entry.name, entry.file_size);
//! }
//!
//! let mut reader = archive.open_member("file.txt")?;
//! let mut data = Vec::new();
//! reader.read_to_end(&mut data)?;
//! # Ok::<(), zipcat::ZipError>(())
//! ```
//!
//! ### Writing a ZIP file
//!
//! ```no_run
//! use zipcat::{CompressionMethod, OpenOptions, ZipArchive};
//!
//! let mut archive = ZipArchive::create("output.zip", OpenOptions::new())?;
//! archive.start_entry("file1.txt", (2024, 1, 1, 0, 0, 0), CompressionMethod::Deflated, 6, false)?;
//! archive.write_data(b"Hello, World!")?;
//! archive.finish_entry()?;
//! archive.close()?;
//! # Ok::<(), zipcat::ZipError>(())
//! ```

pub mod archive;
pub mod compression;
pub mod crypto;
pub mod entry;
pub mod eocd;
pub mod extra;
pub mod error;
pub mod read_stream;
pub mod shared;
pub mod spec;
pub mod write_stream;

pub use archive::{ArchiveMode, OpenOptions, ZipArchive};
pub use entry::{CompressionMethod, DateTime, ZipEntry};
pub use error::{Result, ZipError};
pub use read_stream::ReadStream;
pub use write_stream::WriteStream;
