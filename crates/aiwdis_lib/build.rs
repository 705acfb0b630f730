use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn workspace_root(crate_dir: &Path) -> PathBuf {
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("crate directory should be <root>/crates/<name>")
        .to_path_buf()
}

fn take_until_paren_close(s: &str) -> Option<&str> {
    let s = s.trim();
    let j = s.find(')')?;
    Some(s[..j].trim())
}

fn parse_opcode(s: &str) -> u8 {
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or_else(|| panic!("opcode id must be hex: {s}"));
    u8::from_str_radix(hex, 16).unwrap_or_else(|_| panic!("bad opcode id: {s}"))
}

fn operand_len(fmt: &str) -> u8 {
    match fmt {
        "none" => 0,
        "label8" | "skip8" | "push_i8" => 1,
        "label" | "skip32" | "push_i32" => 4,
        other => panic!("unknown operand format: {other}"),
    }
}

struct OpDef {
    op: u8,
    name: Option<String>,
    size: u8,
    fmt: String,
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let root = workspace_root(&manifest_dir);

    let opcode_path = root.join("aiw").join("aiw-opcode.h");

    println!("cargo:rerun-if-changed={}", opcode_path.display());

    let opcode_src = fs::read_to_string(&opcode_path).expect("read aiw-opcode.h");

    let mut fmts: Vec<String> = Vec::new();
    let mut ops: Vec<OpDef> = Vec::new();

    for line in opcode_src.lines() {
        let l = line.trim();
        if let Some(rest) = l.strip_prefix("FMT(") {
            let name = match take_until_paren_close(rest) {
                Some(v) => v,
                None => continue,
            };
            if !name.is_empty() {
                fmts.push(name.to_string());
            }
            continue;
        }

        let (named, rest) = if let Some(rest) = l.strip_prefix("DEF(") {
            (true, rest)
        } else if let Some(rest) = l.strip_prefix("def(") {
            (false, rest)
        } else {
            continue;
        };

        let inner = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        let (op, name, size, fmt) = match (named, parts.as_slice()) {
            (true, [op, name, size, fmt]) => (*op, Some(name.to_string()), *size, *fmt),
            (false, [op, size, fmt]) => (*op, None, *size, *fmt),
            _ => panic!("malformed opcode line: {l}"),
        };
        let op = parse_opcode(op);
        let size: u8 = size.parse().expect("opcode size");
        if !fmts.iter().any(|f| f == fmt) {
            panic!("opcode 0x{op:02X} uses undeclared format {fmt}");
        }
        if size != 1 + operand_len(fmt) {
            panic!("opcode 0x{op:02X}: size {size} does not match format {fmt}");
        }
        ops.push(OpDef {
            op,
            name,
            size,
            fmt: fmt.to_string(),
        });
    }

    for (i, d) in ops.iter().enumerate() {
        if d.op as usize != i {
            panic!("opcode table must be contiguous: expected 0x{i:02X}, found 0x{:02X}", d.op);
        }
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let out_path = out_dir.join("aiw_tables.rs");

    let mut out = String::new();

    out.push_str("#[allow(non_camel_case_types)]\n");
    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq)]\n");
    out.push_str("pub enum OpFmt {\n");
    for f in &fmts {
        out.push_str(&format!("    {},\n", f.to_ascii_uppercase()));
    }
    out.push_str("}\n\n");

    out.push_str("#[derive(Debug, Clone, Copy)]\n");
    out.push_str("pub struct OpInfo {\n");
    out.push_str("    pub op: u8,\n");
    out.push_str("    pub name: Option<&'static str>,\n");
    out.push_str("    pub size: u8,\n");
    out.push_str("    pub fmt: OpFmt,\n");
    out.push_str("}\n\n");

    out.push_str(&format!("pub const OPCODE_COUNT: usize = {};\n\n", ops.len()));

    out.push_str("pub const OPCODE_INFO: &[OpInfo] = &[\n");
    for d in &ops {
        let name = match &d.name {
            Some(n) => format!("Some(\"{}\")", n),
            None => "None".to_string(),
        };
        out.push_str(&format!(
            "    OpInfo {{ op: 0x{:02X}, name: {}, size: {}, fmt: OpFmt::{} }},\n",
            d.op,
            name,
            d.size,
            d.fmt.to_ascii_uppercase()
        ));
    }
    out.push_str("];\n");

    fs::write(out_path, out).expect("write generated opcode tables");
}
