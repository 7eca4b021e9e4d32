//! Target image validation
//!
//! A target must be a 64-bit ELF file before it is ever run under trace.

use std::fs;
use std::path::{Path, PathBuf};

use goblin::elf::header::{EI_CLASS, ELFCLASS64, EM_X86_64, SIZEOF_IDENT};
use goblin::elf::Elf;

use super::debugger::DebugError;

/// An executable that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    /// Original file path
    pub path: PathBuf,
    /// Raw bytes of the file
    pub data: Vec<u8>,
}

/// Read `path` and check it is a 64-bit ELF image
pub fn validate<P: AsRef<Path>>(path: P) -> Result<ValidatedImage, DebugError> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|source| DebugError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    check_elf64(&data).map_err(|reason| DebugError::Format {
        path: path.to_path_buf(),
        reason,
    })?;

    log::debug!("Validated {} ({} bytes)", path.display(), data.len());
    Ok(ValidatedImage {
        path: path.to_path_buf(),
        data,
    })
}

/// Parse the ELF header and check it describes an x86-64 ELF64 image
pub fn check_elf64(data: &[u8]) -> Result<(), String> {
    if data.len() < SIZEOF_IDENT {
        return Err("file too small".into());
    }
    let header = match Elf::parse_header(data) {
        Ok(header) => header,
        Err(goblin::error::Error::BadMagic(_)) => return Err("bad ELF magic".into()),
        Err(e) => return Err(format!("malformed ELF header: {}", e)),
    };
    if header.e_ident[EI_CLASS] != ELFCLASS64 {
        return Err("not a 64-bit ELF".into());
    }
    if header.e_machine != EM_X86_64 {
        return Err(format!("unsupported machine type {}", header.e_machine));
    }
    Ok(())
}
