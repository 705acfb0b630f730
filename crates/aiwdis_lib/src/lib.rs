use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::Encoding;
use serde::Serialize;
use thiserror::Error;

mod tables {
    include!(concat!(env!("OUT_DIR"), "/aiw_tables.rs"));
}

pub use tables::{OPCODE_COUNT, OpFmt, OpInfo};

/// File signature, "ADV_98 " plus a trailing NUL.
pub const SIGNATURE: &[u8; 8] = b"ADV_98 \0";

/// Signature, two reserved dwords, code offset, string pool offset.
pub const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisasmOptions {
    /// Codec of the string pool.
    pub encoding: &'static Encoding,
    pub line_ending: LineEnding,
}

impl Default for DisasmOptions {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::SHIFT_JIS,
            line_ending: LineEnding::Lf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("not a recognized script container (bad signature)")]
    BadSignature,

    #[error("unterminated string at {address:08X}")]
    UnterminatedString { address: u32 },
}

#[derive(Debug, Error)]
pub enum AiwError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("unknown opcode 0x{opcode:02X} at {address:08X}")]
    UnknownOpcode { opcode: u8, address: u32 },

    /// `needed` is 0 when a header offset itself lies outside its bounds.
    #[error("{what} out of range at {address:08X} ({needed} byte(s) needed, limit {limit:08X})")]
    OutOfRange {
        what: &'static str,
        address: u32,
        needed: u32,
        limit: u32,
    },

    #[error("opcode 0x{opcode:02X} at {address:08X} needs {needed} operand byte(s) past limit {limit:08X}")]
    TruncatedInstruction {
        opcode: u8,
        address: u32,
        needed: u32,
        limit: u32,
    },
}

/// Turns raw string pool bytes into text.
///
/// Returns the text and whether the input held sequences that are malformed in the
/// codec (those are replaced, never fatal).
pub trait TextDecoder {
    fn decode_text(&self, bytes: &[u8]) -> (String, bool);
}

impl TextDecoder for &'static Encoding {
    fn decode_text(&self, bytes: &[u8]) -> (String, bool) {
        let (s, had_errors) = (*self).decode_without_bom_handling(bytes);
        (s.into_owned(), had_errors)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            end: buf.len(),
        }
    }

    /// Reader over `buf[start..end]` that keeps absolute positions.
    fn with_range(buf: &'a [u8], start: usize, end: usize) -> Self {
        Self {
            buf,
            pos: start,
            end: end.min(buf.len()),
        }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn skip(&mut self, n: usize, what: &'static str) -> Result<(), AiwError> {
        self.get_bytes(n, what).map(|_| ())
    }

    fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    fn get_bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], AiwError> {
        if self.remaining() < n {
            return Err(AiwError::OutOfRange {
                what,
                address: self.pos as u32,
                needed: n as u32,
                limit: self.end as u32,
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn get_u8(&mut self, what: &'static str) -> Result<u8, AiwError> {
        Ok(self.get_bytes(1, what)?[0])
    }

    fn get_i8(&mut self, what: &'static str) -> Result<i8, AiwError> {
        Ok(self.get_u8(what)? as i8)
    }

    fn get_u32(&mut self, what: &'static str) -> Result<u32, AiwError> {
        Ok(LittleEndian::read_u32(self.get_bytes(4, what)?))
    }

    fn get_i32(&mut self, what: &'static str) -> Result<i32, AiwError> {
        Ok(LittleEndian::read_i32(self.get_bytes(4, what)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Start of the bytecode region.
    pub code_offset: u32,
    /// Start of the string pool, and the exclusive end of the bytecode region.
    pub pool_offset: u32,
}

pub fn read_header(bytes: &[u8]) -> Result<Header, AiwError> {
    if bytes.get(..SIGNATURE.len()) != Some(&SIGNATURE[..]) {
        return Err(FormatError::BadSignature.into());
    }

    let mut r = Reader::new(bytes);
    r.skip(SIGNATURE.len(), "signature")?;
    // Two reserved dwords, never checked.
    r.skip(4, "header")?;
    r.skip(4, "header")?;
    let code_offset = r.get_i32("header")? as u32;
    let pool_offset = r.get_i32("header")? as u32;

    if pool_offset as usize > bytes.len() {
        return Err(AiwError::OutOfRange {
            what: "string pool offset",
            address: pool_offset,
            needed: 0,
            limit: bytes.len() as u32,
        });
    }
    if code_offset > pool_offset {
        return Err(AiwError::OutOfRange {
            what: "code offset",
            address: code_offset,
            needed: 0,
            limit: pool_offset,
        });
    }

    log::debug!(
        "header: code at {:08X}, strings at {:08X}, file size {:08X}",
        code_offset,
        pool_offset,
        bytes.len()
    );

    Ok(Header {
        code_offset,
        pool_offset,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolString {
    /// Offset from the first byte of the pool.
    pub offset: u32,
    pub text: String,
}

/// Null-terminated strings of the pool, keyed by their offset inside the pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StringPool {
    base: u32,
    entries: Vec<PoolString>,
    #[serde(skip)]
    index: HashMap<u32, usize>,
}

impl StringPool {
    /// Splits `bytes` into null-terminated runs. `base` is the absolute file offset of
    /// `bytes[0]` and is only used for addresses in listings and errors.
    pub fn index<D: TextDecoder + ?Sized>(
        bytes: &[u8],
        base: u32,
        decoder: &D,
    ) -> Result<Self, AiwError> {
        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut pos = 0usize;

        while pos < bytes.len() {
            let key = pos as u32;
            let address = base.wrapping_add(key);
            let len = bytes[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or(FormatError::UnterminatedString { address })?;

            let (text, had_errors) = decoder.decode_text(&bytes[pos..pos + len]);
            if had_errors {
                log::warn!("string at {address:08X} is malformed in the selected encoding");
            }

            index.insert(key, entries.len());
            entries.push(PoolString { offset: key, text });
            pos += len + 1;
        }

        log::debug!("string pool: {} entries in {} bytes", entries.len(), bytes.len());

        Ok(Self {
            base,
            entries,
            index,
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn get(&self, key: u32) -> Option<&str> {
        self.index.get(&key).map(|&i| self.entries[i].text.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = &PoolString> {
        self.entries.iter()
    }
}

pub fn opcode_info(op: u8) -> Option<&'static OpInfo> {
    tables::OPCODE_INFO.get(op as usize)
}

impl OpInfo {
    /// Table mnemonic, or `opcode_<hex>` for opcodes without one.
    pub fn mnemonic(&self) -> Cow<'static, str> {
        match self.name {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("opcode_{:X}", self.op)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operand {
    Label(u32),
    Label8 { rel: i8, target: u32 },
    Skip8(u8),
    Skip32(u32),
    PushI8(i8),
    PushI32(i32),
}

impl Operand {
    /// Push literal, sign-extended to 32 bits.
    pub fn push_value(&self) -> Option<i32> {
        match *self {
            Operand::PushI8(v) => Some(v as i32),
            Operand::PushI32(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instr {
    pub address: u32,
    pub op: u8,
    pub size: u8,
    pub mnemonic: Cow<'static, str>,
    pub operand: Option<Operand>,
    /// Pool text the push literal points at.
    pub string_ref: Option<String>,
}

impl Instr {
    /// Address of the next instruction.
    pub fn end(&self) -> u32 {
        self.address + self.size as u32
    }
}

pub fn relative_target(address: u32, rel: i8) -> u32 {
    address.wrapping_add(1).wrapping_add_signed(rel as i32)
}

/// Whether a push literal may be a string pool offset.
///
/// Small negative values (-64..=-1) never are.
pub fn is_string_candidate(value: i32) -> bool {
    (value <= -65 || value >= -32) && (value as u32) < 0xFFFF_FFE0
}

/// Pool key and text for a push literal, if the literal names a pool string.
pub fn resolve_string_ref(value: i32, pool: &StringPool) -> Option<(u32, &str)> {
    if !is_string_candidate(value) {
        return None;
    }
    let key = u32::try_from(value).ok()?;
    pool.get(key).map(|s| (key, s))
}

fn decode_instruction(r: &mut Reader<'_>, pool: &StringPool) -> Result<Instr, AiwError> {
    let address = r.pos() as u32;
    let op = r.get_u8("opcode")?;
    let info = opcode_info(op).ok_or(AiwError::UnknownOpcode { opcode: op, address })?;

    let needed = info.size as u32 - 1;
    if r.remaining() < needed as usize {
        return Err(AiwError::TruncatedInstruction {
            opcode: op,
            address,
            needed,
            limit: r.end as u32,
        });
    }

    let operand = match info.fmt {
        OpFmt::NONE => None,
        OpFmt::LABEL => Some(Operand::Label(r.get_u32("operand")?)),
        OpFmt::LABEL8 => {
            let rel = r.get_i8("operand")?;
            Some(Operand::Label8 {
                rel,
                target: relative_target(address, rel),
            })
        }
        OpFmt::SKIP8 => Some(Operand::Skip8(r.get_u8("operand")?)),
        OpFmt::SKIP32 => Some(Operand::Skip32(r.get_u32("operand")?)),
        OpFmt::PUSH_I8 => Some(Operand::PushI8(r.get_i8("operand")?)),
        OpFmt::PUSH_I32 => Some(Operand::PushI32(r.get_i32("operand")?)),
    };

    let string_ref = operand
        .and_then(|o| o.push_value())
        .and_then(|v| resolve_string_ref(v, pool))
        .map(|(_, s)| s.to_string());

    Ok(Instr {
        address,
        op,
        size: info.size,
        mnemonic: info.mnemonic(),
        operand,
        string_ref,
    })
}

/// Decodes `[code_offset, pool_offset)` in program order.
pub fn decode_instructions(
    bytes: &[u8],
    header: &Header,
    pool: &StringPool,
) -> Result<Vec<Instr>, AiwError> {
    let mut r = Reader::with_range(bytes, header.code_offset as usize, header.pool_offset as usize);
    let mut out = Vec::new();
    while r.remaining() > 0 {
        out.push(decode_instruction(&mut r, pool)?);
    }
    Ok(out)
}

/// One rendered line of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    pub address: u32,
    pub text: String,
}

impl fmt::Display for ListingLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X} | {}", self.address, self.text)
    }
}

/// Escapes text for a single-line listing.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn render_instr(ins: &Instr) -> String {
    let m = &ins.mnemonic;
    match &ins.operand {
        None | Some(Operand::Skip8(_)) | Some(Operand::Skip32(_)) => m.to_string(),
        Some(Operand::Label(target)) => format!("{m} {target:08X}"),
        Some(Operand::Label8 { target, .. }) => format!("{m} {target:08X}"),
        Some(Operand::PushI32(v)) => match &ins.string_ref {
            Some(s) => format!("{m} dword 0x{:08X} ; offset \"{}\"", *v as u32, escape_text(s)),
            None => format!("{m} dword 0x{:08X}", *v as u32),
        },
        Some(Operand::PushI8(v)) => match &ins.string_ref {
            // Resolved byte pushes are listed in the dword form.
            Some(s) => format!("{m} dword 0x{:08X} ; offset \"{}\"", *v as i32 as u32, escape_text(s)),
            None => format!("{m} byte 0x{:02X}", *v as u8),
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Disassembly {
    pub header: Header,
    pub instructions: Vec<Instr>,
    pub strings: StringPool,
}

impl Disassembly {
    /// Pool keys that some push literal resolved to.
    pub fn referenced_strings(&self) -> BTreeSet<u32> {
        self.instructions
            .iter()
            .filter(|ins| ins.string_ref.is_some())
            .filter_map(|ins| ins.operand.and_then(|o| o.push_value()))
            .map(|v| v as u32)
            .collect()
    }

    /// Code lines, the `; Strings` marker, then one line per pool string.
    pub fn lines(&self) -> Vec<ListingLine> {
        let mut out = Vec::with_capacity(self.instructions.len() + self.strings.len() + 1);
        for ins in &self.instructions {
            out.push(ListingLine {
                address: ins.address,
                text: render_instr(ins),
            });
        }
        out.push(ListingLine {
            address: self.header.pool_offset,
            text: "; Strings".to_string(),
        });
        for s in self.strings.iter() {
            out.push(ListingLine {
                address: self.strings.base().wrapping_add(s.offset),
                text: format!("string \"{}\"", escape_text(&s.text)),
            });
        }
        out
    }

    pub fn render(&self, line_ending: LineEnding) -> String {
        let mut out = String::new();
        for line in self.lines() {
            out.push_str(&line.to_string());
            out.push_str(line_ending.as_str());
        }
        out
    }
}

pub fn disassemble<D: TextDecoder + ?Sized>(bytes: &[u8], decoder: &D) -> Result<Disassembly, AiwError> {
    let header = read_header(bytes)?;
    let strings = StringPool::index(&bytes[header.pool_offset as usize..], header.pool_offset, decoder)?;
    let instructions = decode_instructions(bytes, &header, &strings)?;

    let d = Disassembly {
        header,
        instructions,
        strings,
    };
    log::debug!(
        "decoded {} instructions, {} of {} strings referenced",
        d.instructions.len(),
        d.referenced_strings().len(),
        d.strings.len()
    );
    Ok(d)
}

pub fn disassemble_with_options(bytes: &[u8], options: DisasmOptions) -> Result<String, AiwError> {
    let d = disassemble(bytes, &options.encoding)?;
    Ok(d.render(options.line_ending))
}

pub fn disassemble_to_string(bytes: &[u8]) -> Result<String, AiwError> {
    disassemble_with_options(bytes, DisasmOptions::default())
}
