use aiwdis_lib::{
    AiwError, DisasmOptions, FormatError, HEADER_SIZE, LineEnding, Operand, SIGNATURE, disassemble,
    disassemble_to_string, disassemble_with_options, read_header,
};
use pretty_assertions::assert_eq;

/// Header, code placed right after it, string pool right after the code.
fn script(code: &[u8], pool: &[u8]) -> Vec<u8> {
    let code_offset = HEADER_SIZE as u32;
    let pool_offset = code_offset + code.len() as u32;
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&code_offset.to_le_bytes());
    out.extend_from_slice(&pool_offset.to_le_bytes());
    out.extend_from_slice(code);
    out.extend_from_slice(pool);
    out
}

fn listing(bytes: &[u8]) -> Vec<String> {
    disassemble_to_string(bytes)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn single_nop_and_empty_pool() {
    let bytes = script(&[0x00], &[]);
    assert_eq!(listing(&bytes), vec!["00000018 | nop", "00000019 | ; Strings"]);
}

#[test]
fn strings_follow_marker_at_absolute_addresses() {
    let bytes = script(&[0x07], b"first\0\0third\0");
    assert_eq!(
        listing(&bytes),
        vec![
            "00000018 | ret",
            "00000019 | ; Strings",
            "00000019 | string \"first\"",
            "0000001F | string \"\"",
            "00000020 | string \"third\"",
        ]
    );
}

#[test]
fn branch_targets() {
    let mut code = vec![0x01];
    code.extend_from_slice(&0x0000_0040u32.to_le_bytes());
    code.extend_from_slice(&[0x04, 0xFE]);
    code.extend_from_slice(&[0x06, 0x05]);
    code.push(0x05);
    code.extend_from_slice(&(-1i32).to_le_bytes());
    let bytes = script(&code, &[]);
    assert_eq!(
        listing(&bytes),
        vec![
            "00000018 | jump_false 00000040",
            "0000001D | jump_rel_8 0000001C",
            "0000001F | call_rel_8 00000025",
            "00000021 | call FFFFFFFF",
            "00000026 | ; Strings",
        ]
    );
}

#[test]
fn discarded_operands_are_consumed() {
    let mut code = vec![0x09, 1, 2, 3, 4, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x7B, 0, 0, 0, 0];
    code.extend_from_slice(&[0x0F, 0xAA, 0x93, 0xBB, 0x13, 0xB2]);
    let bytes = script(&code, &[]);
    assert_eq!(
        listing(&bytes),
        vec![
            "00000018 | opcode_9",
            "0000001D | call_script",
            "00000022 | opcode_7B",
            "00000027 | opcode_F",
            "00000029 | opcode_93",
            "0000002B | opcode_13",
            "0000002C | opcode_B2",
            "0000002D | ; Strings",
        ]
    );
}

#[test]
fn push_resolves_pool_offsets() {
    let mut code = vec![0x0D];
    code.extend_from_slice(&6i32.to_le_bytes());
    code.extend_from_slice(&[0x0E, 0x00]);
    code.push(0x0D);
    code.extend_from_slice(&3i32.to_le_bytes());
    let bytes = script(&code, b"hello\0line\n\"two\"\0");
    assert_eq!(
        listing(&bytes),
        vec![
            "00000018 | push dword 0x00000006 ; offset \"line\\n\\\"two\\\"\"",
            "0000001D | push dword 0x00000000 ; offset \"hello\"",
            "0000001F | push dword 0x00000003",
            "00000024 | ; Strings",
            "00000024 | string \"hello\"",
            "0000002A | string \"line\\n\\\"two\\\"\"",
        ]
    );
}

#[test]
fn small_negative_pushes_are_never_annotated() {
    let mut code = vec![0x0D];
    code.extend_from_slice(&(-1i32).to_le_bytes());
    code.extend_from_slice(&[0x0E, 0xC0]);
    code.push(0x0D);
    code.extend_from_slice(&(-65i32).to_le_bytes());
    let bytes = script(&code, b"x\0");
    assert_eq!(
        listing(&bytes),
        vec![
            "00000018 | push dword 0xFFFFFFFF",
            "0000001D | push byte 0xC0",
            "0000001F | push dword 0xFFFFFFBF",
            "00000024 | ; Strings",
            "00000024 | string \"x\"",
        ]
    );
}

#[test]
fn addresses_are_contiguous_and_end_at_pool() {
    let mut code = vec![0x00, 0x02, 0x00, 0x0D, 1, 0, 0, 0, 0x94, 7, 0x23, 0x03, 0, 0, 0, 0];
    code.extend_from_slice(&[0x3A, 0x0E, 0x10]);
    let bytes = script(&code, b"s\0");
    let d = disassemble(&bytes, &encoding_rs::UTF_8).unwrap();

    assert_eq!(d.instructions[0].address, d.header.code_offset);
    for pair in d.instructions.windows(2) {
        assert_eq!(pair[1].address, pair[0].end());
    }
    assert_eq!(d.instructions.last().unwrap().end(), d.header.pool_offset);
    assert_eq!(d.instructions.len(), 8);
    assert_eq!(d.instructions[1].operand, Some(Operand::Label8 { rel: 0, target: 0x1A }));
}

#[test]
fn unknown_opcode_aborts() {
    let mut code = vec![0x00; 8];
    code.push(0xFF);
    let bytes = script(&code, &[]);
    let err = disassemble_to_string(&bytes).unwrap_err();
    match err {
        AiwError::UnknownOpcode { opcode, address } => {
            assert_eq!(opcode, 0xFF);
            assert_eq!(address, 0x20);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        disassemble_to_string(&bytes).unwrap_err().to_string(),
        "unknown opcode 0xFF at 00000020"
    );
}

#[test]
fn first_unassigned_opcode_is_unknown() {
    let bytes = script(&[0xB3], &[]);
    assert!(matches!(
        disassemble_to_string(&bytes),
        Err(AiwError::UnknownOpcode { opcode: 0xB3, address: 0x18 })
    ));
}

#[test]
fn byte_push_into_pool_renders_as_dword() {
    let bytes = script(&[0x0E, 0x00], b"hi\0");
    assert_eq!(listing(&bytes)[0], "00000018 | push dword 0x00000000 ; offset \"hi\"");
}

#[test]
fn operand_crossing_pool_is_out_of_range() {
    let bytes = script(&[0x0D, 1, 2], b"abc\0");
    let err = disassemble_to_string(&bytes).unwrap_err();
    match err {
        AiwError::TruncatedInstruction {
            opcode,
            address,
            needed,
            limit,
        } => {
            assert_eq!(opcode, 0x0D);
            assert_eq!(address, 0x18);
            assert_eq!(needed, 4);
            assert_eq!(limit, 0x1B);
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        "opcode 0x0D at 00000018 needs 4 operand byte(s) past limit 0000001B"
    );
}

#[test]
fn bad_signature() {
    let mut bytes = script(&[0x00], &[]);
    bytes[6] = b'_';
    assert!(matches!(
        read_header(&bytes),
        Err(AiwError::Format(FormatError::BadSignature))
    ));
    assert!(matches!(
        read_header(b"ADV"),
        Err(AiwError::Format(FormatError::BadSignature))
    ));
}

#[test]
fn truncated_header() {
    let bytes = script(&[], &[]);
    let err = read_header(&bytes[..20]).unwrap_err();
    assert!(matches!(
        err,
        AiwError::OutOfRange {
            address: 0x14,
            needed: 4,
            limit: 0x14,
            ..
        }
    ));
}

#[test]
fn offsets_must_fit_the_file() {
    let mut bytes = script(&[0x00], &[]);
    bytes[20..24].copy_from_slice(&0x1Cu32.to_le_bytes());
    assert!(matches!(
        read_header(&bytes),
        Err(AiwError::OutOfRange { address: 0x1C, limit: 0x19, .. })
    ));

    let mut bytes = script(&[0x00], &[]);
    bytes[16..20].copy_from_slice(&0x1Au32.to_le_bytes());
    assert!(matches!(
        read_header(&bytes),
        Err(AiwError::OutOfRange { address: 0x1A, limit: 0x19, .. })
    ));
}

#[test]
fn unterminated_pool_string() {
    let bytes = script(&[0x00], b"ok\0broken");
    assert!(matches!(
        disassemble_to_string(&bytes),
        Err(AiwError::Format(FormatError::UnterminatedString { address: 0x1C }))
    ));
}

#[test]
fn legacy_codecs_and_crlf() {
    let mut code = vec![0x0D];
    code.extend_from_slice(&0i32.to_le_bytes());
    let bytes = script(&code, b"\xD6\xD0\xCE\xC4\0");
    let out = disassemble_with_options(
        &bytes,
        DisasmOptions {
            encoding: encoding_rs::GBK,
            line_ending: LineEnding::CrLf,
        },
    )
    .unwrap();
    assert_eq!(
        out,
        "00000018 | push dword 0x00000000 ; offset \"中文\"\r\n\
         0000001D | ; Strings\r\n\
         0000001D | string \"中文\"\r\n"
    );
}

#[test]
fn default_codec_is_shift_jis() {
    let bytes = script(&[0x00], b"\x83\x65\x83\x58\x83\x67\0");
    assert_eq!(listing(&bytes)[2], "00000019 | string \"テスト\"");
}

#[test]
fn referenced_strings_do_not_change_listing() {
    let mut code = vec![0x0E, 0x02];
    code.extend_from_slice(&[0x0E, 0x02]);
    let bytes = script(&code, b"a\0b\0c\0");
    let d = disassemble(&bytes, &encoding_rs::UTF_8).unwrap();
    assert_eq!(d.referenced_strings().into_iter().collect::<Vec<_>>(), vec![2]);
    assert_eq!(d.lines().len(), 2 + 1 + 3);
}
