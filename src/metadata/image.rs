//! PE/CLI container walk: MZ and PE headers, section table, CLR data
//! directory, metadata root and stream headers.
//!
//! Offsets follow ECMA-335 partition II and the PE/COFF spec. All reads are
//! bounds-checked; any structural violation surfaces as a `BadImage` reason
//! string at the probe boundary.

use crate::identity::ProcessorArchitecture;

use super::tables;
use super::ProbeResult;

const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const METADATA_SIGNATURE: u32 = 0x424A_5342; // "BSJB"

const MACHINE_I386: u16 = 0x014c;
const MACHINE_AMD64: u16 = 0x8664;
const MACHINE_IA64: u16 = 0x0200;
const MACHINE_ARM: u16 = 0x01c0;
const MACHINE_ARMNT: u16 = 0x01c4;

const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;

/// Bounds-checked little-endian cursor over the raw image.
pub(super) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Result<Self, String> {
        if pos > data.len() {
            return Err(format!("offset {pos:#x} beyond end of image"));
        }
        Ok(Self { data, pos })
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), String> {
        if pos > self.data.len() {
            return Err(format!("seek to {pos:#x} beyond end of image"));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<(), String> {
        self.seek(self.pos.checked_add(count).ok_or("offset overflow")?)
    }

    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(count).ok_or("offset overflow")?;
        if end > self.data.len() {
            return Err(format!(
                "read of {count} bytes at {:#x} beyond end of image",
                self.pos
            ));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, String> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, String> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, String> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, String> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_offset: u32,
    raw_size: u32,
}

fn rva_to_offset(sections: &[Section], rva: u32) -> Result<usize, String> {
    for section in sections {
        let span = section.virtual_size.max(section.raw_size);
        if rva >= section.virtual_address && rva < section.virtual_address + span {
            return Ok((rva - section.virtual_address + section.raw_offset) as usize);
        }
    }
    Err(format!("RVA {rva:#x} not mapped by any section"))
}

/// Parse a full image into a [`ProbeResult`].
pub(super) fn parse(data: &[u8]) -> Result<ProbeResult, String> {
    let mut cursor = Cursor::new(data);
    if cursor.bytes(2)? != DOS_MAGIC {
        return Err("missing MZ signature".to_string());
    }
    cursor.seek(0x3c)?;
    let pe_offset = cursor.u32()? as usize;
    cursor.seek(pe_offset)?;
    if cursor.bytes(4)? != PE_SIGNATURE {
        return Err("missing PE signature".to_string());
    }

    // COFF file header.
    let machine = cursor.u16()?;
    let section_count = cursor.u16()? as usize;
    cursor.skip(12)?; // timestamp, symbol table pointer, symbol count
    let optional_header_size = cursor.u16()? as usize;
    cursor.skip(2)?; // characteristics
    let optional_header_start = cursor.pos();

    // Optional header: only the data directories differ between PE32 and
    // PE32+, at offsets 96 and 112 respectively.
    let magic = cursor.u16()?;
    let directories_offset = match magic {
        0x10b => 96,
        0x20b => 112,
        other => return Err(format!("unknown optional header magic {other:#x}")),
    };
    cursor.seek(optional_header_start + directories_offset - 4)?;
    let directory_count = cursor.u32()? as usize;
    if directory_count < 15 {
        return Err("image has no CLR data directory".to_string());
    }
    cursor.seek(optional_header_start + directories_offset + 14 * 8)?;
    let clr_rva = cursor.u32()?;
    let clr_size = cursor.u32()?;
    if clr_rva == 0 || clr_size == 0 {
        return Err("not a managed image (empty CLR directory)".to_string());
    }

    // Section table follows the optional header.
    cursor.seek(optional_header_start + optional_header_size)?;
    let mut sections = Vec::with_capacity(section_count);
    for _ in 0..section_count {
        cursor.skip(8)?; // name
        let virtual_size = cursor.u32()?;
        let virtual_address = cursor.u32()?;
        let raw_size = cursor.u32()?;
        let raw_offset = cursor.u32()?;
        cursor.skip(16)?; // relocations, line numbers, characteristics
        sections.push(Section {
            virtual_address,
            virtual_size,
            raw_offset,
            raw_size,
        });
    }

    // CLR header.
    let mut clr = Cursor::at(data, rva_to_offset(&sections, clr_rva)?)?;
    let clr_cb = clr.u32()?;
    if clr_cb < 48 {
        return Err(format!("CLR header too small ({clr_cb} bytes)"));
    }
    clr.skip(4)?; // runtime major/minor
    let metadata_rva = clr.u32()?;
    let metadata_size = clr.u32()? as usize;
    let cor_flags = clr.u32()?;
    if metadata_rva == 0 || metadata_size == 0 {
        return Err("CLR header has no metadata".to_string());
    }

    let architecture = architecture_of(machine, cor_flags);

    // Metadata root.
    let metadata_offset = rva_to_offset(&sections, metadata_rva)?;
    let mut meta = Cursor::at(data, metadata_offset)?;
    if meta.u32()? != METADATA_SIGNATURE {
        return Err("missing metadata signature".to_string());
    }
    meta.skip(8)?; // major, minor, reserved
    let version_length = meta.u32()? as usize;
    if version_length > 255 {
        return Err(format!("implausible metadata version length {version_length}"));
    }
    let version_bytes = meta.bytes(version_length)?;
    let runtime_version = cstr(version_bytes)?.to_string();
    let is_winmd = runtime_version.starts_with("WindowsRuntime");
    meta.skip(2)?; // flags
    let stream_count = meta.u16()? as usize;

    let mut tables_stream = None;
    let mut strings_heap: &[u8] = &[];
    let mut blob_heap: &[u8] = &[];
    for _ in 0..stream_count {
        let offset = meta.u32()? as usize;
        let size = meta.u32()? as usize;
        let name = stream_name(&mut meta)?;
        let start = metadata_offset
            .checked_add(offset)
            .ok_or("stream offset overflow")?;
        let end = start.checked_add(size).ok_or("stream size overflow")?;
        if end > data.len() {
            return Err(format!("stream '{name}' extends beyond end of image"));
        }
        let contents = &data[start..end];
        match name.as_str() {
            "#~" | "#-" => tables_stream = Some(contents),
            "#Strings" => strings_heap = contents,
            "#Blob" => blob_heap = contents,
            _ => {}
        }
    }
    let tables_stream = tables_stream.ok_or("image has no table stream")?;

    let decoded = tables::decode(tables_stream, strings_heap, blob_heap)?;

    Ok(ProbeResult {
        identity: decoded.identity,
        references: decoded.references,
        scatter_files: decoded.scatter_files,
        runtime_version,
        architecture,
        is_winmd,
        framework_name: decoded.framework_name,
    })
}

fn architecture_of(machine: u16, cor_flags: u32) -> ProcessorArchitecture {
    match machine {
        MACHINE_AMD64 => ProcessorArchitecture::Amd64,
        MACHINE_IA64 => ProcessorArchitecture::Ia64,
        MACHINE_ARM | MACHINE_ARMNT => ProcessorArchitecture::Arm,
        MACHINE_I386 => {
            if cor_flags & COMIMAGE_FLAGS_ILONLY != 0
                && cor_flags & COMIMAGE_FLAGS_32BITREQUIRED == 0
            {
                ProcessorArchitecture::Msil
            } else {
                ProcessorArchitecture::X86
            }
        }
        _ => ProcessorArchitecture::None,
    }
}

/// Null-terminated string from a fixed-size buffer.
fn cstr(buffer: &[u8]) -> Result<&str, String> {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    std::str::from_utf8(&buffer[..end]).map_err(|_| "string is not UTF-8".to_string())
}

/// Stream names are null-terminated and padded to a 4-byte boundary.
fn stream_name(cursor: &mut Cursor<'_>) -> Result<String, String> {
    let mut name = Vec::new();
    loop {
        let chunk = cursor.bytes(4)?;
        let terminator = chunk.iter().position(|&b| b == 0);
        match terminator {
            Some(i) => {
                name.extend_from_slice(&chunk[..i]);
                break;
            }
            None => {
                name.extend_from_slice(chunk);
                if name.len() > 32 {
                    return Err("unterminated stream name".to_string());
                }
            }
        }
    }
    String::from_utf8(name).map_err(|_| "stream name is not UTF-8".to_string())
}
