//! `#~` table-stream decoding.
//!
//! The table stream packs up to 45 table kinds back to back, with row widths
//! that depend on heap sizes and on how many rows the *other* tables have
//! (narrow or wide indexes). To reach the Assembly, AssemblyRef and File
//! tables the decoder computes the exact width of every intervening table
//! and skips it by size. TypeRef, MemberRef and CustomAttribute are decoded
//! as well, enough to recover `TargetFrameworkAttribute`.

use sha1::{Digest, Sha1};

use crate::identity::{
    normalize_culture, AssemblyIdentity, AssemblyVersion, ProcessorArchitecture, PublicKeyToken,
};

use super::image::Cursor;

const TABLE_COUNT: usize = 64;

const MODULE: usize = 0x00;
const TYPE_REF: usize = 0x01;
const TYPE_DEF: usize = 0x02;
const FIELD_PTR: usize = 0x03;
const FIELD: usize = 0x04;
const METHOD_PTR: usize = 0x05;
const METHOD_DEF: usize = 0x06;
const PARAM_PTR: usize = 0x07;
const PARAM: usize = 0x08;
const INTERFACE_IMPL: usize = 0x09;
const MEMBER_REF: usize = 0x0A;
const CONSTANT: usize = 0x0B;
const CUSTOM_ATTRIBUTE: usize = 0x0C;
const FIELD_MARSHAL: usize = 0x0D;
const DECL_SECURITY: usize = 0x0E;
const CLASS_LAYOUT: usize = 0x0F;
const FIELD_LAYOUT: usize = 0x10;
const STAND_ALONE_SIG: usize = 0x11;
const EVENT_MAP: usize = 0x12;
const EVENT_PTR: usize = 0x13;
const EVENT: usize = 0x14;
const PROPERTY_MAP: usize = 0x15;
const PROPERTY_PTR: usize = 0x16;
const PROPERTY: usize = 0x17;
const METHOD_SEMANTICS: usize = 0x18;
const METHOD_IMPL: usize = 0x19;
const MODULE_REF: usize = 0x1A;
const TYPE_SPEC: usize = 0x1B;
const IMPL_MAP: usize = 0x1C;
const FIELD_RVA: usize = 0x1D;
const ENC_LOG: usize = 0x1E;
const ENC_MAP: usize = 0x1F;
const ASSEMBLY: usize = 0x20;
const ASSEMBLY_PROCESSOR: usize = 0x21;
const ASSEMBLY_OS: usize = 0x22;
const ASSEMBLY_REF: usize = 0x23;
const ASSEMBLY_REF_PROCESSOR: usize = 0x24;
const ASSEMBLY_REF_OS: usize = 0x25;
const FILE: usize = 0x26;
const EXPORTED_TYPE: usize = 0x27;
const MANIFEST_RESOURCE: usize = 0x28;
const NESTED_CLASS: usize = 0x29;
const GENERIC_PARAM: usize = 0x2A;
const METHOD_SPEC: usize = 0x2B;
const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;

// Coded index groups, in ECMA-335 tag order. `usize::MAX` marks an unused
// tag slot (it still widens the tag field).
const TYPE_DEF_OR_REF: &[usize] = &[TYPE_DEF, TYPE_REF, TYPE_SPEC];
const HAS_CONSTANT: &[usize] = &[FIELD, PARAM, PROPERTY];
const HAS_CUSTOM_ATTRIBUTE: &[usize] = &[
    METHOD_DEF,
    FIELD,
    TYPE_REF,
    TYPE_DEF,
    PARAM,
    INTERFACE_IMPL,
    MEMBER_REF,
    MODULE,
    DECL_SECURITY,
    PROPERTY,
    EVENT,
    STAND_ALONE_SIG,
    MODULE_REF,
    TYPE_SPEC,
    ASSEMBLY,
    ASSEMBLY_REF,
    FILE,
    EXPORTED_TYPE,
    MANIFEST_RESOURCE,
    GENERIC_PARAM,
    GENERIC_PARAM_CONSTRAINT,
    METHOD_SPEC,
];
const HAS_FIELD_MARSHAL: &[usize] = &[FIELD, PARAM];
const HAS_DECL_SECURITY: &[usize] = &[TYPE_DEF, METHOD_DEF, ASSEMBLY];
const MEMBER_REF_PARENT: &[usize] = &[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC];
const HAS_SEMANTICS: &[usize] = &[EVENT, PROPERTY];
const METHOD_DEF_OR_REF: &[usize] = &[METHOD_DEF, MEMBER_REF];
const MEMBER_FORWARDED: &[usize] = &[FIELD, METHOD_DEF];
const IMPLEMENTATION: &[usize] = &[FILE, ASSEMBLY_REF, EXPORTED_TYPE];
const CUSTOM_ATTRIBUTE_TYPE: &[usize] =
    &[usize::MAX, usize::MAX, METHOD_DEF, MEMBER_REF, usize::MAX];
const RESOLUTION_SCOPE: &[usize] = &[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF];
const TYPE_OR_METHOD_DEF: &[usize] = &[TYPE_DEF, METHOD_DEF];

/// Tag values into the coded groups above.
const HCA_TAG_ASSEMBLY: u32 = 14;
const CAT_TAG_MEMBER_REF: u32 = 3;
const MRP_TAG_TYPE_REF: u32 = 1;

const ASSEMBLY_REF_FLAG_FULL_PUBLIC_KEY: u32 = 0x0001;
const FILE_FLAG_CONTAINS_NO_METADATA: u32 = 0x0001;

pub(super) struct DecodedTables {
    pub identity: Option<AssemblyIdentity>,
    pub references: Vec<AssemblyIdentity>,
    pub scatter_files: Vec<String>,
    pub framework_name: Option<String>,
}

struct Layout {
    rows: [u32; TABLE_COUNT],
    wide_strings: bool,
    wide_guid: bool,
    wide_blob: bool,
}

impl Layout {
    fn string_size(&self) -> usize {
        if self.wide_strings {
            4
        } else {
            2
        }
    }

    fn guid_size(&self) -> usize {
        if self.wide_guid {
            4
        } else {
            2
        }
    }

    fn blob_size(&self) -> usize {
        if self.wide_blob {
            4
        } else {
            2
        }
    }

    fn table_size(&self, table: usize) -> usize {
        if self.rows[table] > 0xFFFF {
            4
        } else {
            2
        }
    }

    fn coded_size(&self, group: &[usize]) -> usize {
        let tag_bits = usize::BITS - (group.len() - 1).leading_zeros();
        let max_rows = group
            .iter()
            .filter(|&&t| t != usize::MAX)
            .map(|&t| self.rows[t])
            .max()
            .unwrap_or(0);
        if u64::from(max_rows) >= 1u64 << (16 - tag_bits) {
            4
        } else {
            2
        }
    }

    fn row_size(&self, table: usize) -> Result<usize, String> {
        let s = self.string_size();
        let g = self.guid_size();
        let b = self.blob_size();
        Ok(match table {
            MODULE => 2 + s + 3 * g,
            TYPE_REF => self.coded_size(RESOLUTION_SCOPE) + 2 * s,
            TYPE_DEF => {
                4 + 2 * s
                    + self.coded_size(TYPE_DEF_OR_REF)
                    + self.table_size(FIELD)
                    + self.table_size(METHOD_DEF)
            }
            FIELD_PTR => self.table_size(FIELD),
            FIELD => 2 + s + b,
            METHOD_PTR => self.table_size(METHOD_DEF),
            METHOD_DEF => 8 + s + b + self.table_size(PARAM),
            PARAM_PTR => self.table_size(PARAM),
            PARAM => 4 + s,
            INTERFACE_IMPL => self.table_size(TYPE_DEF) + self.coded_size(TYPE_DEF_OR_REF),
            MEMBER_REF => self.coded_size(MEMBER_REF_PARENT) + s + b,
            CONSTANT => 2 + self.coded_size(HAS_CONSTANT) + b,
            CUSTOM_ATTRIBUTE => {
                self.coded_size(HAS_CUSTOM_ATTRIBUTE) + self.coded_size(CUSTOM_ATTRIBUTE_TYPE) + b
            }
            FIELD_MARSHAL => self.coded_size(HAS_FIELD_MARSHAL) + b,
            DECL_SECURITY => 2 + self.coded_size(HAS_DECL_SECURITY) + b,
            CLASS_LAYOUT => 6 + self.table_size(TYPE_DEF),
            FIELD_LAYOUT => 4 + self.table_size(FIELD),
            STAND_ALONE_SIG => b,
            EVENT_MAP => self.table_size(TYPE_DEF) + self.table_size(EVENT),
            EVENT_PTR => self.table_size(EVENT),
            EVENT => 2 + s + self.coded_size(TYPE_DEF_OR_REF),
            PROPERTY_MAP => self.table_size(TYPE_DEF) + self.table_size(PROPERTY),
            PROPERTY_PTR => self.table_size(PROPERTY),
            PROPERTY => 2 + s + b,
            METHOD_SEMANTICS => 2 + self.table_size(METHOD_DEF) + self.coded_size(HAS_SEMANTICS),
            METHOD_IMPL => self.table_size(TYPE_DEF) + 2 * self.coded_size(METHOD_DEF_OR_REF),
            MODULE_REF => s,
            TYPE_SPEC => b,
            IMPL_MAP => 2 + self.coded_size(MEMBER_FORWARDED) + s + self.table_size(MODULE_REF),
            FIELD_RVA => 4 + self.table_size(FIELD),
            ENC_LOG => 8,
            ENC_MAP => 4,
            ASSEMBLY => 16 + b + 2 * s,
            ASSEMBLY_PROCESSOR => 4,
            ASSEMBLY_OS => 12,
            ASSEMBLY_REF => 12 + 2 * b + 2 * s,
            ASSEMBLY_REF_PROCESSOR => 4 + self.table_size(ASSEMBLY_REF),
            ASSEMBLY_REF_OS => 12 + self.table_size(ASSEMBLY_REF),
            FILE => 4 + s + b,
            EXPORTED_TYPE => 8 + 2 * s + self.coded_size(IMPLEMENTATION),
            MANIFEST_RESOURCE => 8 + s + self.coded_size(IMPLEMENTATION),
            NESTED_CLASS => 2 * self.table_size(TYPE_DEF),
            GENERIC_PARAM => 4 + self.coded_size(TYPE_OR_METHOD_DEF) + s,
            METHOD_SPEC => self.coded_size(METHOD_DEF_OR_REF) + b,
            GENERIC_PARAM_CONSTRAINT => {
                self.table_size(GENERIC_PARAM) + self.coded_size(TYPE_DEF_OR_REF)
            }
            other => return Err(format!("unsupported metadata table {other:#x}")),
        })
    }
}

struct Tables<'a> {
    data: &'a [u8],
    strings: &'a [u8],
    blob: &'a [u8],
    layout: Layout,
    /// Byte offset and row width of each present table.
    starts: [Option<(usize, usize)>; TABLE_COUNT],
}

impl<'a> Tables<'a> {
    fn row(&self, table: usize, row: u32) -> Result<Cursor<'a>, String> {
        let (start, size) = self.starts[table]
            .ok_or_else(|| format!("table {table:#x} not present in image"))?;
        if row == 0 || row > self.layout.rows[table] {
            return Err(format!("row {row} out of range for table {table:#x}"));
        }
        Cursor::at(self.data, start + (row as usize - 1) * size)
    }

    fn read_index(&self, cursor: &mut Cursor<'_>, wide: bool) -> Result<u32, String> {
        if wide {
            cursor.u32()
        } else {
            cursor.u16().map(u32::from)
        }
    }

    fn read_string(&self, cursor: &mut Cursor<'_>) -> Result<String, String> {
        let index = self.read_index(cursor, self.layout.wide_strings)? as usize;
        if index >= self.strings.len() {
            if index == 0 {
                return Ok(String::new());
            }
            return Err(format!("string index {index:#x} beyond #Strings heap"));
        }
        let tail = &self.strings[index..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end])
            .map(str::to_string)
            .map_err(|_| "heap string is not UTF-8".to_string())
    }

    fn read_blob(&self, cursor: &mut Cursor<'_>) -> Result<&'a [u8], String> {
        let index = self.read_index(cursor, self.layout.wide_blob)? as usize;
        if index == 0 {
            return Ok(&[]);
        }
        if index >= self.blob.len() {
            return Err(format!("blob index {index:#x} beyond #Blob heap"));
        }
        let mut blob_cursor = Cursor::at(self.blob, index)?;
        let length = read_compressed_length(&mut blob_cursor)?;
        blob_cursor.bytes(length)
    }

    fn read_coded(&self, cursor: &mut Cursor<'_>, group: &[usize]) -> Result<(u32, u32), String> {
        let tag_bits = usize::BITS - (group.len() - 1).leading_zeros();
        let wide = self.layout.coded_size(group) == 4;
        let value = self.read_index(cursor, wide)?;
        let tag = value & ((1 << tag_bits) - 1);
        Ok((tag, value >> tag_bits))
    }

    fn read_table_index(&self, cursor: &mut Cursor<'_>, table: usize) -> Result<u32, String> {
        self.read_index(cursor, self.layout.table_size(table) == 4)
    }
}

/// ECMA-335 II.23.2 compressed unsigned integer.
fn read_compressed_length(cursor: &mut Cursor<'_>) -> Result<usize, String> {
    let first = cursor.u8()?;
    if first & 0x80 == 0 {
        Ok(first as usize)
    } else if first & 0xC0 == 0x80 {
        let second = cursor.u8()?;
        Ok((((first & 0x3F) as usize) << 8) | second as usize)
    } else if first & 0xE0 == 0xC0 {
        let rest = cursor.bytes(3)?;
        Ok((((first & 0x1F) as usize) << 24)
            | ((rest[0] as usize) << 16)
            | ((rest[1] as usize) << 8)
            | rest[2] as usize)
    } else {
        Err(format!("invalid compressed length prefix {first:#x}"))
    }
}

/// The token is the last eight bytes of the key's SHA-1, reversed.
fn token_from_public_key(key: &[u8]) -> PublicKeyToken {
    let digest = Sha1::digest(key);
    let mut token = [0u8; 8];
    for (i, byte) in digest[digest.len() - 8..].iter().rev().enumerate() {
        token[i] = *byte;
    }
    PublicKeyToken::new(token)
}

fn public_key_or_token(blob: &[u8], is_full_key: bool) -> Result<Option<PublicKeyToken>, String> {
    if blob.is_empty() {
        return Ok(None);
    }
    if is_full_key {
        return Ok(Some(token_from_public_key(blob)));
    }
    if blob.len() != 8 {
        return Err(format!("public key token blob has length {}", blob.len()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(blob);
    Ok(Some(PublicKeyToken::new(bytes)))
}

pub(super) fn decode(
    stream: &[u8],
    strings: &[u8],
    blob: &[u8],
) -> Result<DecodedTables, String> {
    let mut cursor = Cursor::new(stream);
    cursor.skip(4)?; // reserved
    cursor.skip(2)?; // major, minor
    let heap_sizes = cursor.u8()?;
    cursor.skip(1)?; // reserved
    let valid = cursor.u64()?;
    cursor.skip(8)?; // sorted

    let mut rows = [0u32; TABLE_COUNT];
    for (table, row_count) in rows.iter_mut().enumerate() {
        if valid & (1u64 << table) != 0 {
            *row_count = cursor.u32()?;
        }
    }

    let layout = Layout {
        rows,
        wide_strings: heap_sizes & 0x01 != 0,
        wide_guid: heap_sizes & 0x02 != 0,
        wide_blob: heap_sizes & 0x04 != 0,
    };

    let mut starts = [None; TABLE_COUNT];
    let mut offset = cursor.pos();
    for table in 0..TABLE_COUNT {
        if layout.rows[table] == 0 {
            continue;
        }
        let size = layout.row_size(table)?;
        starts[table] = Some((offset, size));
        offset = offset
            .checked_add(size.checked_mul(layout.rows[table] as usize).ok_or("table size overflow")?)
            .ok_or("table size overflow")?;
        if offset > stream.len() {
            return Err(format!("table {table:#x} extends beyond the table stream"));
        }
    }

    let tables = Tables {
        data: stream,
        strings,
        blob,
        layout,
        starts,
    };

    let identity = decode_assembly(&tables)?;
    let references = decode_assembly_refs(&tables)?;
    let scatter_files = decode_files(&tables)?;
    let framework_name = decode_target_framework(&tables).unwrap_or(None);

    Ok(DecodedTables {
        identity,
        references,
        scatter_files,
        framework_name,
    })
}

fn decode_assembly(tables: &Tables<'_>) -> Result<Option<AssemblyIdentity>, String> {
    if tables.layout.rows[ASSEMBLY] == 0 {
        return Ok(None);
    }
    let mut row = tables.row(ASSEMBLY, 1)?;
    row.skip(4)?; // hash algorithm
    let version = AssemblyVersion::new(row.u16()?, row.u16()?, row.u16()?, row.u16()?);
    row.skip(4)?; // flags
    let public_key = tables.read_blob(&mut row)?;
    let name = tables.read_string(&mut row)?;
    let culture = tables.read_string(&mut row)?;
    if name.is_empty() {
        return Err("assembly manifest has an empty name".to_string());
    }
    let token = if public_key.is_empty() {
        None
    } else {
        Some(token_from_public_key(public_key))
    };
    Ok(Some(AssemblyIdentity {
        simple_name: name,
        version: Some(version),
        culture: normalize_culture(&culture),
        public_key_token: token,
        processor_architecture: ProcessorArchitecture::None,
    }))
}

fn decode_assembly_refs(tables: &Tables<'_>) -> Result<Vec<AssemblyIdentity>, String> {
    let count = tables.layout.rows[ASSEMBLY_REF];
    let mut references = Vec::with_capacity(count as usize);
    for index in 1..=count {
        let mut row = tables.row(ASSEMBLY_REF, index)?;
        let version = AssemblyVersion::new(row.u16()?, row.u16()?, row.u16()?, row.u16()?);
        let flags = row.u32()?;
        let key_blob = tables.read_blob(&mut row)?;
        let name = tables.read_string(&mut row)?;
        let culture = tables.read_string(&mut row)?;
        if name.is_empty() {
            return Err(format!("assembly reference {index} has an empty name"));
        }
        references.push(AssemblyIdentity {
            simple_name: name,
            version: Some(version),
            culture: normalize_culture(&culture),
            public_key_token: public_key_or_token(
                key_blob,
                flags & ASSEMBLY_REF_FLAG_FULL_PUBLIC_KEY != 0,
            )?,
            processor_architecture: ProcessorArchitecture::None,
        });
    }
    Ok(references)
}

fn decode_files(tables: &Tables<'_>) -> Result<Vec<String>, String> {
    let count = tables.layout.rows[FILE];
    let mut scatter = Vec::new();
    for index in 1..=count {
        let mut row = tables.row(FILE, index)?;
        let flags = row.u32()?;
        let name = tables.read_string(&mut row)?;
        if flags & FILE_FLAG_CONTAINS_NO_METADATA != 0 && !name.is_empty() {
            scatter.push(name);
        }
    }
    Ok(scatter)
}

/// Walk CustomAttribute rows looking for `TargetFrameworkAttribute` on the
/// assembly itself; its constructor argument is the framework name.
fn decode_target_framework(tables: &Tables<'_>) -> Result<Option<String>, String> {
    let count = tables.layout.rows[CUSTOM_ATTRIBUTE];
    for index in 1..=count {
        let mut row = tables.row(CUSTOM_ATTRIBUTE, index)?;
        let (parent_tag, parent_row) = tables.read_coded(&mut row, HAS_CUSTOM_ATTRIBUTE)?;
        let (type_tag, type_row) = tables.read_coded(&mut row, CUSTOM_ATTRIBUTE_TYPE)?;
        if parent_tag != HCA_TAG_ASSEMBLY || parent_row != 1 || type_tag != CAT_TAG_MEMBER_REF {
            continue;
        }
        let mut member = tables.row(MEMBER_REF, type_row)?;
        let (class_tag, class_row) = tables.read_coded(&mut member, MEMBER_REF_PARENT)?;
        if class_tag != MRP_TAG_TYPE_REF {
            continue;
        }
        let mut type_ref = tables.row(TYPE_REF, class_row)?;
        let _ = tables.read_coded(&mut type_ref, RESOLUTION_SCOPE)?;
        let type_name = tables.read_string(&mut type_ref)?;
        if type_name != "TargetFrameworkAttribute" {
            continue;
        }
        let value = tables.read_blob(&mut row)?;
        return Ok(decode_fixed_string_argument(value));
    }
    Ok(None)
}

/// Custom-attribute value blob: u16 prolog 0x0001 followed by a SerString.
fn decode_fixed_string_argument(value: &[u8]) -> Option<String> {
    let mut cursor = Cursor::new(value);
    if cursor.u16().ok()? != 0x0001 {
        return None;
    }
    // 0xFF is the null string marker.
    if value.get(2) == Some(&0xFF) {
        return None;
    }
    let length = read_compressed_length(&mut cursor).ok()?;
    let bytes = cursor.bytes(length).ok()?;
    std::str::from_utf8(bytes).map(str::to_string).ok()
}
