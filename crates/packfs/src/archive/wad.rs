//! Doom WAD support.
//!
//! `"IWAD"` or `"PWAD"`, a 32-bit lump count, and a 32-bit offset to the
//! directory; each directory record is a 32-bit start, a 32-bit size, and
//! an 8-byte NUL-padded lump name.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ReadBytesExt, LE};

use crate::archive::flat::{fixed_name, FlatArchive, FlatEntry};
use crate::archive::{Archive, ArchiveInfo, Archiver};
use crate::error::Error;

pub(crate) const INFO: ArchiveInfo = ArchiveInfo {
	extension: "WAD",
	description: "DOOM engine format",
};

const NAME_LIMIT: usize = 8;

fn read_header(file: &mut File) -> Result<(u32, u32), Error> {
	let mut magic = [0u8; 4];
	file.read_exact(&mut magic)?;

	if &magic != b"IWAD" && &magic != b"PWAD" {
		return Err(Error::UnsupportedArchive);
	}

	let count = file.read_u32::<LE>()?;
	let dir_offset = file.read_u32::<LE>()?;
	Ok((count, dir_offset))
}

pub(crate) struct WadArchiver;

impl Archiver for WadArchiver {
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

		read_header(&mut file).is_ok()
	}

	fn open(&self, source: &Path, for_writing: bool) -> Result<Box<dyn Archive>, Error> {
		if for_writing {
			return Err(Error::ReadOnlyArchive);
		}

		let mut file = File::open(source)?;
		let (count, dir_offset) = read_header(&mut file)?;
		file.seek(SeekFrom::Start(u64::from(dir_offset)))?;

		let mut entries = Vec::with_capacity(count as usize);

		for _ in 0..count {
			let start = u64::from(file.read_u32::<LE>()?);
			let size = u64::from(file.read_u32::<LE>()?);
			let mut raw = [0u8; 8];
			file.read_exact(&mut raw)?;
			entries.push(FlatEntry {
				name: fixed_name(&raw),
				start,
				size,
			});
		}

		Ok(Box::new(FlatArchive::new(&INFO, source, NAME_LIMIT, entries)))
	}
}
