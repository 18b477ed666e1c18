//! Microsoft Reader LIT writer.
//!
//! A LIT file is an ITOL/ITLS container: a fixed header, a piece table, a
//! directory of named entries packed into AOLL chunks, and a content area
//! holding section 0. Sections 1-3 are stored inside section 0 after
//! their transforms (LZX compression, DES encryption) have been applied.
//!
//! Content documents and the package metadata are stored as ReBinary
//! token streams rather than XML text.

pub mod chunks;
pub mod directory;
pub mod drm;
pub mod lzx;
pub mod maps;
pub mod rebinary;
mod sections;
mod writer;

pub use chunks::{decode_vlq, encode_vlq};
pub use directory::{DirEntry, Directory};
pub use maps::{MapKind, TagMap, html_map, opf_map};
pub use rebinary::{PageBreak, TokenizedItem, tokenize};
pub use writer::{LitConfig, write_lit, write_lit_to_writer, write_lit_with_config};

// ============================================================================
// Token flags
// ============================================================================

pub const FLAG_OPENING: u32 = 1 << 0;
pub const FLAG_CLOSING: u32 = 1 << 1;
pub const FLAG_BLOCK: u32 = 1 << 2;
pub const FLAG_HEAD: u32 = 1 << 3;
pub const FLAG_ATOM: u32 = 1 << 4;
/// Marks a tag or attribute name written out in full. Like every token
/// integer it is stored as a UTF-8 code point, so on disk it reads `E8 80 80`.
pub const FLAG_CUSTOM: u32 = 0x8000;
/// Marks an attribute value written as an integer.
pub const ATTR_NUMBER: u32 = 0xFFFF;

// ============================================================================
// Container layout
// ============================================================================

pub const DCHUNK_SIZE: usize = 0x2000;
pub const CCHUNK_SIZE: usize = 0x200;
/// A quickref is recorded for every fifth directory entry in a chunk.
pub const QUICKREF_DENSITY: usize = 1 + (1 << 2);

/// Offset and size recorded for the root folder entry.
pub const ROOT_OFFSET: u64 = 0x11C1_D13D_A4D6_AE78;
pub const ROOT_SIZE: u64 = 0x39C1_0D88_BC76_AE13;

/// Storage section names, by section number.
pub const SECTION_NAMES: [&str; 4] = [
    "Uncompressed",
    "MSCompressed",
    "EbEncryptDS",
    "EbEncryptOnlyDS",
];

pub const LITFILE_GUID: &str = "{0A9007C1-4076-11D3-8789-0000F8105754}";
pub const PIECE3_GUID: &str = "{0A9007C3-4076-11D3-8789-0000F8105754}";
pub const PIECE4_GUID: &str = "{0A9007C4-4076-11D3-8789-0000F8105754}";
pub const DES_GUID: &str = "{67F6E4A2-60BF-11D3-8540-00C04F58C3CF}";
pub const LZXCOMPRESS_GUID: &str = "{0A9007C6-4076-11D3-8789-0000F8105754}";

pub const MSDES_CONTROL: [u8; 16] = [
    0x03, 0x00, 0x00, 0x00, 0x29, 0x17, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xa5, 0xa5, 0x00,
    0x00,
];

pub const LZXC_CONTROL: [u8; 32] = [
    0x07, 0x00, 0x00, 0x00, b'L', b'Z', b'X', b'C', 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00,
    0x00, 0x04, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

pub const BLOCK_CAOL: [u8; 48] = [
    b'C', b'A', b'O', b'L', 0x02, 0x00, 0x00, 0x00, 0x50, 0x00, 0x00, 0x00, 0x37, 0x13, 0x03,
    0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0,
];

pub const BLOCK_ITSF: [u8; 16] = [
    b'I', b'T', b'S', b'F', 0x04, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
    0x00,
];

/// Pack a registry-format GUID into its 16-byte on-disk form.
///
/// The first three groups are little-endian integers; the last two groups
/// are stored as raw bytes. Malformed hex digits pack as zero.
pub fn pack_guid(guid: &str) -> [u8; 16] {
    let hex: String = guid.chars().filter(char::is_ascii_hexdigit).collect();
    let field = |start: usize, len: usize| -> u32 {
        hex.get(start..start + len)
            .and_then(|s| u32::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };

    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&field(0, 8).to_le_bytes());
    out[4..6].copy_from_slice(&(field(8, 4) as u16).to_le_bytes());
    out[6..8].copy_from_slice(&(field(12, 4) as u16).to_le_bytes());
    for (i, byte) in out[8..].iter_mut().enumerate() {
        *byte = field(16 + i * 2, 2) as u8;
    }
    out
}
