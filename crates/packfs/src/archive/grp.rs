//! Build engine groupfile support.
//!
//! The format, per its author: 12 bytes of signature (`"KenSilverman"`),
//! a 32-bit file count, then 16 bytes per file (12-byte name, 32-bit
//! size), with the raw data packed afterwards in declared order.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use byteorder::{ReadBytesExt, LE};

use crate::archive::flat::{fixed_name, FlatArchive, FlatEntry};
use crate::archive::{Archive, ArchiveInfo, Archiver};
use crate::error::Error;

pub(crate) const INFO: ArchiveInfo = ArchiveInfo {
	extension: "GRP",
	description: "Build engine Groupfile format",
};

const MAGIC: &[u8; 12] = b"KenSilverman";
const NAME_LIMIT: usize = 12;

fn read_header(file: &mut File) -> Result<u32, Error> {
	let mut magic = [0u8; 12];
	file.read_exact(&mut magic)?;

	if &magic != MAGIC {
		return Err(Error::UnsupportedArchive);
	}

	Ok(file.read_u32::<LE>()?)
}

pub(crate) struct GrpArchiver;

impl Archiver for GrpArchiver {
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
		let count = read_header(&mut file)?;
		let mut entries = Vec::with_capacity(count as usize);

		for _ in 0..count {
			let mut raw = [0u8; 12];
			file.read_exact(&mut raw)?;
			let size = u64::from(file.read_u32::<LE>()?);
			entries.push(FlatEntry {
				name: fixed_name(&raw),
				start: 0,
				size,
			});
		}

		// Data begins after the signature, the count, and the whole
		// header block, one file after another in declared order.
		let mut location = 12 + 4 + u64::from(count) * 16;

		for entry in &mut entries {
			entry.start = location;
			location += entry.size;
		}

		Ok(Box::new(FlatArchive::new(&INFO, source, NAME_LIMIT, entries)))
	}
}
