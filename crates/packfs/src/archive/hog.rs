//! Descent HOG file support.
//!
//! A 3-byte `"DHF"` signature, then records repeated until end-of-file:
//! a 13-byte NUL-padded name, a 32-bit size, and the raw data.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use byteorder::{ReadBytesExt, LE};

use crate::archive::flat::{fixed_name, FlatArchive, FlatEntry};
use crate::archive::{Archive, ArchiveInfo, Archiver};
use crate::error::Error;
use crate::platform;

pub(crate) const INFO: ArchiveInfo = ArchiveInfo {
	extension: "HOG",
	description: "Descent I/II HOG file format",
};

const MAGIC: &[u8; 3] = b"DHF";
const NAME_LIMIT: usize = 13;

fn read_magic(file: &mut File) -> Result<(), Error> {
	let mut magic = [0u8; 3];
	let mut filled = 0;

	while filled < magic.len() {
		match platform::read_retrying(file, &mut magic[filled..])? {
			0 => return Err(Error::UnsupportedArchive),
			count => filled += count,
		}
	}

	if &magic != MAGIC {
		return Err(Error::UnsupportedArchive);
	}

	Ok(())
}

/// Reads the next 13-byte name field, or `None` at a clean end-of-file.
fn read_name(file: &mut File) -> Result<Option<[u8; 13]>, Error> {
	let mut raw = [0u8; 13];
	let mut filled = 0;

	while filled < raw.len() {
		match platform::read_retrying(file, &mut raw[filled..])? {
			0 if filled == 0 => return Ok(None),
			0 => return Err(Error::Corrupt("truncated HOG record header")),
			count => filled += count,
		}
	}

	Ok(Some(raw))
}

pub(crate) struct HogArchiver;

impl Archiver for HogArchiver {
	fn info(&self) -> &'static ArchiveInfo {
		&INFO
	}

	fn probe(&self, source: &Path, for_writing: bool) -> bool {
		if for_writing {
			return false;
		}

		let Ok(mut file) = File::open(source) else {
			return false;
		};

		read_magic(&mut file).is_ok()
	}

	fn open(&self, source: &Path, for_writing: bool) -> Result<Box<dyn Archive>, Error> {
		if for_writing {
			return Err(Error::ReadOnlyArchive);
		}

		let mut file = File::open(source)?;
		read_magic(&mut file)?;

		// No count in the header; walk records until the file ends.
		let mut entries = Vec::new();

		while let Some(raw) = read_name(&mut file)? {
			let size = u64::from(file.read_u32::<LE>()?);
			let start = file.stream_position()?;
			entries.push(FlatEntry {
				name: fixed_name(&raw),
				start,
				size,
			});
			file.seek(SeekFrom::Start(start + size))?;
		}

		Ok(Box::new(FlatArchive::new(&INFO, source, NAME_LIMIT, entries)))
	}
}
