//! Canonical match-action table entry and the per-table metadata derived
//! from a pipeline's match-field declarations.

/// Per-field match kind, as declared by the pipeline compiler (out of
/// scope for this crate — supplied verbatim by the embedding application).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMatchType {
    Exact,
    Lpm,
    Wildcard,
}

/// A single match field's position within the table's key, in bits.
#[derive(Debug, Clone, Copy)]
pub struct MatchFieldInfo {
    /// Bit offset of this field within the pipeline's header/metadata
    /// space (not within the table key — `key_offset` in [`TableParams`]
    /// is derived from the first field's offset).
    pub offset: u32,
    pub n_bits: u32,
    pub match_type: FieldMatchType,
    /// True if the field lives in a packet header (subject to
    /// network-byte-order conversion in the text codec); false for
    /// metadata fields, which are always host byte order.
    pub is_header: bool,
}

/// Table-wide match kind, derived from its match fields: all exact is
/// `Exact`; all exact except a final LPM field is `Lpm`; anything else is
/// `Wildcard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Lpm,
    Wildcard,
}

/// Metadata derived once from a table's match-field declarations and its
/// enabled actions. Immutable for the table's lifetime.
#[derive(Debug, Clone)]
pub struct TableParams {
    pub match_type: MatchType,
    pub key_offset: u32,
    pub key_size: u32,
    /// `0xFF` bytes covering each match field's extent, zero elsewhere.
    pub key_mask0: Vec<u8>,
    pub action_data_size: u32,
    pub n_keys_max: u32,
}

impl TableParams {
    /// Derives params for a non-stub table from its match fields and the
    /// largest `data_size` among its enabled actions.
    pub fn derive(
        match_fields: &[MatchFieldInfo],
        action_data_size: u32,
        n_keys_max: u32,
    ) -> TableParams {
        if match_fields.is_empty() {
            return TableParams {
                match_type: MatchType::Wildcard,
                key_offset: 0,
                key_size: 0,
                key_mask0: Vec::new(),
                action_data_size,
                n_keys_max,
            };
        }

        let first = &match_fields[0];
        let last = &match_fields[match_fields.len() - 1];

        let all_exact = match_fields
            .iter()
            .all(|f| f.match_type == FieldMatchType::Exact);
        let match_type = if all_exact {
            MatchType::Exact
        } else if match_fields[..match_fields.len() - 1]
            .iter()
            .all(|f| f.match_type == FieldMatchType::Exact)
            && last.match_type == FieldMatchType::Lpm
        {
            MatchType::Lpm
        } else {
            MatchType::Wildcard
        };

        let key_offset = first.offset / 8;
        let key_size = (last.offset + last.n_bits - first.offset) / 8;

        let mut key_mask0 = vec![0u8; key_size as usize];
        for f in match_fields {
            let start = ((f.offset - first.offset) / 8) as usize;
            let size = (f.n_bits / 8) as usize;
            key_mask0[start..start + size].fill(0xFF);
        }

        TableParams {
            match_type,
            key_offset,
            key_size,
            key_mask0,
            action_data_size,
            n_keys_max,
        }
    }
}

/// A single action a table may invoke: its name, the size (bytes) of its
/// combined argument data, and the argument layout used by the text codec.
#[derive(Debug, Clone)]
pub struct ActionDescriptor {
    pub name: String,
    pub args: Vec<ActionArgInfo>,
    /// Size in bytes of this action's own argument data (may be smaller
    /// than a table's `action_data_size`, which is the max across all
    /// actions enabled for that table).
    pub data_size: u32,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, args: Vec<ActionArgInfo>) -> Self {
        let bits: u32 = args.iter().map(|a| a.n_bits).sum();
        ActionDescriptor {
            name: name.into(),
            args,
            data_size: bits.div_ceil(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionArgInfo {
    pub name: String,
    pub n_bits: u32,
}

/// A match-action rule. `key`/`key_mask` are present iff the table has
/// match fields; `action_data` is present iff the invoked action has a
/// nonzero `data_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub key: Option<Vec<u8>>,
    pub key_mask: Option<Vec<u8>>,
    /// Opaque precomputed hash, preserved verbatim on duplication; never
    /// recomputed by this crate.
    pub key_signature: u64,
    pub key_priority: u32,
    pub action_id: u32,
    pub action_data: Option<Vec<u8>>,
}

impl TableEntry {
    pub fn new_stub(action_id: u32, action_data: Option<Vec<u8>>) -> Self {
        TableEntry {
            key: None,
            key_mask: None,
            key_signature: 0,
            key_priority: 0,
            action_id,
            action_data,
        }
    }
}

/// Compares two entries for key identity under a table-wide mask.
/// Missing per-entry masks are treated as all-ones. Priority is not part
/// of key identity.
pub fn key_equal(key_mask0: &[u8], e0: &TableEntry, e1: &TableEntry) -> bool {
    let (Some(k0), Some(k1)) = (e0.key.as_deref(), e1.key.as_deref()) else {
        // Stub tables have no key at all; treat as identical (there is
        // only ever one conceptual "entry" — the default).
        return e0.key.is_none() && e1.key.is_none();
    };

    for i in 0..key_mask0.len() {
        let km0 = key_mask0[i];
        let km0n = e0.key_mask.as_deref().map_or(0xFF, |m| m[i]);
        let km1n = e1.key_mask.as_deref().map_or(0xFF, |m| m[i]);

        if (km0n & km0) != (km1n & km0) {
            return false;
        }

        if (k0[i] & km0n & km0) != (k1[i] & km1n & km0) {
            return false;
        }
    }

    true
}
