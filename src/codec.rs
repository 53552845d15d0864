//! Line-oriented entry text codec.
//!
//! Grammar (whitespace-separated tokens; `#`, `;`, `//` start an
//! end-of-line comment):
//!
//! ```text
//! entry := [ "match" field+ ] [ "priority" U32 ] "action" NAME ( ARG_NAME VALUE )*
//! field := HEX64 [ "/" HEX64 ]
//! VALUE := ("H(" | "N(") HEX64 ")"
//! ```
//!
//! Match-field endianness is driven by the field's own `is_header` flag
//! (no `H()`/`N()` wrapper in the grammar for fields); action-argument
//! endianness is driven by whichever wrapper is literally present in the
//! text. Emission writes the whole key/mask as one contiguous hex blob per
//! field group — the inverse of parsing but not token-for-token symmetric
//! with it for multi-field tables (which parse one token per field) — while
//! action arguments are written one `name H(hex)` pair per declared
//! argument, which *is* token-for-token symmetric with parsing.

use crate::error::{CtlError, Result};
use crate::table::entry::{ActionDescriptor, MatchFieldInfo, TableEntry};

/// Zero-extends `raw` to 64 bits, shifts left by `64 - n_bits`,
/// byte-swaps to big-endian, and copies the low `n_bits/8` bytes: the
/// byte-order-agnostic network-order encoding recipe.
fn encode_network(raw: u64, n_bits: u32) -> Vec<u8> {
    let n_bytes = (n_bits / 8) as usize;
    let shifted = raw << (64 - n_bits);
    shifted.to_be_bytes()[..n_bytes].to_vec()
}

/// Copies `raw`'s low `n_bits/8` bytes in the machine's native byte
/// order, with no shift or swap.
fn encode_host(raw: u64, n_bits: u32) -> Vec<u8> {
    let n_bytes = (n_bits / 8) as usize;
    raw.to_ne_bytes()[..n_bytes].to_vec()
}

fn encode_field(raw: u64, n_bits: u32, is_header: bool) -> Vec<u8> {
    if is_header {
        encode_network(raw, n_bits)
    } else {
        encode_host(raw, n_bits)
    }
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' | b';' => return &line[..i],
            b'/' if bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => i += 1,
        }
    }
    line
}

fn parse_hex_u64(tok: &str) -> Result<u64> {
    let tok = tok.trim();
    let digits = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")).unwrap_or(tok);
    u64::from_str_radix(digits, 16)
        .map_err(|_| CtlError::validation(format!("malformed hex literal: {tok:?}")))
}

/// `H(HEX)` or `N(HEX)`; returns `(is_network, value)`.
fn parse_value_token(tok: &str) -> Result<(bool, u64)> {
    if tok.len() < 4 || !tok.ends_with(')') {
        return Err(CtlError::validation(format!("malformed value token: {tok:?}")));
    }
    let is_network = match &tok[..1] {
        "H" => false,
        "N" => true,
        _ => return Err(CtlError::validation(format!("value token must start with H( or N(: {tok:?}"))),
    };
    if &tok[1..2] != "(" {
        return Err(CtlError::validation(format!("malformed value token: {tok:?}")));
    }
    let inner = &tok[2..tok.len() - 1];
    Ok((is_network, parse_hex_u64(inner)?))
}

/// Parses one line of entry text. Returns `Ok(None)` for a blank or
/// wholly-comment line. `is_stub` tables accept omitting the `match`
/// clause (they have no match fields to supply); tables with match
/// fields must always supply one.
pub fn parse_line(
    match_fields: &[MatchFieldInfo],
    actions: &[ActionDescriptor],
    is_stub: bool,
    line: &str,
) -> Result<Option<TableEntry>> {
    let stripped = strip_comment(line);
    let tokens: Vec<&str> = stripped.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut idx = 0;
    let mut key: Option<Vec<u8>> = None;
    let mut key_mask: Option<Vec<u8>> = None;
    let mut key_priority = 0u32;

    if tokens[idx] == "match" {
        if is_stub {
            return Err(CtlError::validation(
                "stub tables do not accept a match clause".to_string(),
            ));
        }
        idx += 1;
        if tokens.len() < idx + match_fields.len() {
            return Err(CtlError::validation(
                "not enough match field tokens for this table".to_string(),
            ));
        }

        let first_offset = match_fields[0].offset;
        let last_field = &match_fields[match_fields.len() - 1];
        // Span from the first field's offset to the end of the last field,
        // matching `TableParams::derive` — not the sum of field widths,
        // since non-contiguous fields leave zero-filled gaps in the key.
        let key_size = ((last_field.offset + last_field.n_bits - first_offset) / 8) as usize;
        let mut key_buf = vec![0u8; key_size];
        let mut mask_buf = vec![0xFFu8; key_size];

        for field in match_fields {
            let tok = tokens[idx];
            idx += 1;
            let offset = ((field.offset - first_offset) / 8) as usize;
            let size = (field.n_bits / 8) as usize;

            let (val_tok, mask_tok) = match tok.split_once('/') {
                Some((v, m)) => (v, Some(m)),
                None => (tok, None),
            };

            let val = parse_hex_u64(val_tok)?;
            let val_bytes = encode_field(val, field.n_bits, field.is_header);
            key_buf[offset..offset + size].copy_from_slice(&val_bytes);

            if let Some(m) = mask_tok {
                let mask = parse_hex_u64(m)?;
                let mask_bytes = encode_field(mask, field.n_bits, field.is_header);
                mask_buf[offset..offset + size].copy_from_slice(&mask_bytes);
            }
        }

        key = Some(key_buf);
        key_mask = Some(mask_buf);
    } else if !is_stub && !match_fields.is_empty() {
        return Err(CtlError::validation(
            "table has match fields; entry text must start with a match clause".to_string(),
        ));
    }

    if tokens.get(idx) == Some(&"priority") {
        idx += 1;
        let tok = tokens.get(idx).ok_or_else(|| {
            CtlError::validation("priority keyword with no value".to_string())
        })?;
        key_priority = tok
            .parse::<u32>()
            .map_err(|_| CtlError::validation(format!("malformed priority value: {tok:?}")))?;
        idx += 1;
    }

    if tokens.get(idx) != Some(&"action") {
        return Err(CtlError::validation(
            "entry text must end in an action clause".to_string(),
        ));
    }
    idx += 1;

    let name = *tokens.get(idx).ok_or_else(|| {
        CtlError::validation("action keyword with no name".to_string())
    })?;
    idx += 1;

    let (action_id, action) = actions
        .iter()
        .enumerate()
        .find(|(_, a)| a.name == name)
        .map(|(i, a)| (i as u32, a))
        .ok_or_else(|| CtlError::validation(format!("unknown action: {name:?}")))?;

    if tokens.len() < idx + action.args.len() * 2 {
        return Err(CtlError::validation(format!(
            "not enough argument tokens for action {name:?}"
        )));
    }

    let mut action_data = if action.data_size > 0 {
        Some(Vec::with_capacity(action.data_size as usize))
    } else {
        None
    };

    for arg in &action.args {
        let arg_name = tokens[idx];
        let arg_val = tokens[idx + 1];
        idx += 2;

        if arg_name != arg.name {
            return Err(CtlError::validation(format!(
                "expected argument {:?}, got {:?}",
                arg.name, arg_name
            )));
        }

        let (is_network, val) = parse_value_token(arg_val)?;
        let bytes = if is_network {
            encode_network(val, arg.n_bits)
        } else {
            encode_host(val, arg.n_bits)
        };
        action_data.as_mut().expect("action declares nonzero data_size").extend_from_slice(&bytes);
    }

    if idx != tokens.len() {
        return Err(CtlError::validation(
            "trailing tokens after a complete entry".to_string(),
        ));
    }

    Ok(Some(TableEntry {
        key,
        key_mask,
        key_signature: 0,
        key_priority,
        action_id,
        action_data,
    }))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Inverse of `encode_host`: recovers the `u64` whose low `bytes.len()`
/// native-endian bytes are `bytes`, so that re-encoding with `H(..)`
/// reproduces `bytes` exactly regardless of the host's endianness.
fn decode_host_value(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_ne_bytes(buf)
}

/// Emits the text form of `entry`. Inverse of [`parse_line`] for round-trip
/// purposes, but not literally symmetric: match fields are written as one
/// combined hex blob (and mask, if present) rather than split per field.
/// Action arguments, by contrast, are written one `name H(hex)` pair per
/// declared argument, exactly as `parse_line` expects them back.
pub fn emit_line(entry: &TableEntry, action: &ActionDescriptor) -> String {
    let mut out = String::new();

    if let Some(key) = &entry.key {
        out.push_str("match ");
        out.push_str(&hex(key));
        if let Some(mask) = &entry.key_mask {
            out.push('/');
            out.push_str(&hex(mask));
        }
        out.push(' ');
    }

    out.push_str(&format!("priority {} ", entry.key_priority));
    out.push_str(&format!("action {}", action.name));

    if let Some(data) = &entry.action_data {
        let mut offset = 0usize;
        for arg in &action.args {
            let n_bytes = (arg.n_bits / 8) as usize;
            let val = decode_host_value(&data[offset..offset + n_bytes]);
            out.push_str(&format!(" {} H({:x})", arg.name, val));
            offset += n_bytes;
        }
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::table::entry::{ActionArgInfo, FieldMatchType};

    fn ipv4_field() -> MatchFieldInfo {
        MatchFieldInfo {
            offset: 0,
            n_bits: 32,
            match_type: FieldMatchType::Exact,
            is_header: true,
        }
    }

    fn fwd_action() -> ActionDescriptor {
        ActionDescriptor::new(
            "fwd",
            vec![ActionArgInfo {
                name: "port".into(),
                n_bits: 16,
            }],
        )
    }

    #[test]
    fn blank_and_comment_lines_parse_to_none() {
        let fields = vec![ipv4_field()];
        let actions = vec![fwd_action()];
        assert!(parse_line(&fields, &actions, false, "").unwrap().is_none());
        assert!(parse_line(&fields, &actions, false, "   ").unwrap().is_none());
        assert!(parse_line(&fields, &actions, false, "# just a comment").unwrap().is_none());
        assert!(parse_line(&fields, &actions, false, "// also a comment").unwrap().is_none());
    }

    #[test]
    fn s6_text_round_trip() {
        let fields = vec![ipv4_field()];
        let actions = vec![fwd_action()];

        let line = "match 0x0a000001/0xffffffff priority 10 action fwd port N(0x0007)";
        let entry = parse_line(&fields, &actions, false, line).unwrap().unwrap();

        assert_eq!(entry.key, Some(vec![0x0a, 0x00, 0x00, 0x01]));
        assert_eq!(entry.key_mask, Some(vec![0xff, 0xff, 0xff, 0xff]));
        assert_eq!(entry.key_priority, 10);
        assert_eq!(entry.action_data, Some(vec![0x00, 0x07]));

        let emitted = emit_line(&entry, &actions[0]);
        let reparsed = parse_line(&fields, &actions, false, &emitted).unwrap().unwrap();

        assert_eq!(reparsed.key, entry.key);
        assert_eq!(reparsed.key_mask, entry.key_mask);
        assert_eq!(reparsed.action_data, entry.action_data);
        assert_eq!(reparsed.key_priority, entry.key_priority);
    }

    #[test]
    fn host_order_value_is_copied_without_byteswap() {
        // A non-header metadata field: H()-equivalent native copy, no
        // network-order shift/swap.
        let fields = vec![MatchFieldInfo {
            offset: 0,
            n_bits: 16,
            match_type: FieldMatchType::Exact,
            is_header: false,
        }];
        let actions = vec![fwd_action()];

        let line = "match 0x0007 action fwd port H(0x0007)";
        let entry = parse_line(&fields, &actions, false, line).unwrap().unwrap();
        // Native byte order on this platform: low byte first.
        assert_eq!(entry.key, Some(0x0007u16.to_ne_bytes().to_vec()));
        assert_eq!(entry.action_data, Some(0x0007u16.to_ne_bytes().to_vec()));
    }

    #[test]
    fn stub_table_rejects_match_clause() {
        let actions = vec![fwd_action()];
        let line = "match 0x01 action fwd port H(0x0001)";
        assert!(parse_line(&[], &actions, true, line).is_err());
    }

    #[test]
    fn missing_match_clause_on_non_stub_table_errors() {
        let fields = vec![ipv4_field()];
        let actions = vec![fwd_action()];
        let line = "priority 1 action fwd port H(0x0001)";
        assert!(parse_line(&fields, &actions, false, line).is_err());
    }

    #[test]
    fn non_contiguous_match_fields_leave_gap_untouched() {
        // Two exact fields with a two-byte gap between them (bytes 2-3
        // belong to neither field); the key must span the whole gap
        // rather than just the sum of the fields' own widths.
        let fields = vec![
            MatchFieldInfo {
                offset: 0,
                n_bits: 16,
                match_type: FieldMatchType::Exact,
                is_header: true,
            },
            MatchFieldInfo {
                offset: 32,
                n_bits: 16,
                match_type: FieldMatchType::Exact,
                is_header: true,
            },
        ];
        let actions = vec![fwd_action()];

        let line = "match 0x0a0b 0x0c0d action fwd port H(0x0001)";
        let entry = parse_line(&fields, &actions, false, line).unwrap().unwrap();

        assert_eq!(entry.key, Some(vec![0x0a, 0x0b, 0x00, 0x00, 0x0c, 0x0d]));
        assert_eq!(entry.key_mask, Some(vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff]));
    }

    #[test]
    fn multi_arg_action_round_trips() {
        let fields = vec![ipv4_field()];
        let two_arg_action = ActionDescriptor::new(
            "fwd2",
            vec![
                ActionArgInfo {
                    name: "port".into(),
                    n_bits: 16,
                },
                ActionArgInfo {
                    name: "ttl".into(),
                    n_bits: 8,
                },
            ],
        );
        let actions = vec![two_arg_action];

        let line = "match 0x0a000001 action fwd2 port N(0x0007) ttl H(0x40)";
        let entry = parse_line(&fields, &actions, false, line).unwrap().unwrap();
        assert_eq!(entry.action_data, Some(vec![0x00, 0x07, 0x40]));

        let emitted = emit_line(&entry, &actions[0]);
        let reparsed = parse_line(&fields, &actions, false, &emitted).unwrap().unwrap();
        assert_eq!(reparsed.action_data, entry.action_data);
        assert_eq!(reparsed.key, entry.key);
    }

    #[test]
    fn unknown_action_name_errors() {
        let fields = vec![ipv4_field()];
        let actions = vec![fwd_action()];
        let line = "match 0x0a000001 action drop";
        assert!(parse_line(&fields, &actions, false, line).is_err());
    }

    #[test]
    fn argument_name_mismatch_errors() {
        let fields = vec![ipv4_field()];
        let actions = vec![fwd_action()];
        let line = "match 0x0a000001 action fwd wrong_name H(0x0001)";
        assert!(parse_line(&fields, &actions, false, line).is_err());
    }
}
