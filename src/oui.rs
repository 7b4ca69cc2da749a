//! MAC address vendor lookup (OUI — Organizationally Unique Identifier).
//!
//! Unlike a compile-time embedded table, this loads a tab-separated vendor
//! database from disk once at startup and caches it in memory. Prefixes are
//! variable length (a `/24` suffix on the hex prefix means 24 bits, i.e. the
//! usual 3-byte OUI; shorter or longer prefixes are legal and common in the
//! real IEEE MA-S/MA-M registries). Lookup tries each distinct prefix length
//! present in the file, longest first, and returns the first hit.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct OuiDatabase {
    /// prefix length in bits -> (prefix as lowercase hex nibbles, no separators) -> vendor
    by_length: Vec<(usize, HashMap<String, String>)>,
}

impl OuiDatabase {
    /// Parse a tab-separated OUI database from its textual contents.
    ///
    /// Format: `PREFIX[/LENGTH]\tVendor Name`. Blank lines and lines starting
    /// with `#` are ignored. PREFIX is colon- or dash- or no-separator hex.
    /// LENGTH is a bit length; if absent it defaults to 24 (the classic
    /// 3-byte OUI).
    pub fn parse(contents: &str) -> Self {
        let mut by_length_map: HashMap<usize, HashMap<String, String>> = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((prefix_field, vendor)) = line.split_once('\t') else {
                continue;
            };
            let vendor = vendor.trim();
            if vendor.is_empty() {
                continue;
            }

            let (prefix_raw, length) = match prefix_field.split_once('/') {
                Some((p, len_str)) => match len_str.trim().parse::<usize>() {
                    Ok(len) => (p, len),
                    Err(_) => continue,
                },
                None => (prefix_field, 24),
            };

            let hex: String = prefix_raw
                .chars()
                .filter(|c| c.is_ascii_hexdigit())
                .map(|c| c.to_ascii_lowercase())
                .collect();

            let nibbles = length.div_ceil(4);
            if hex.len() < nibbles {
                continue;
            }
            let key: String = hex.chars().take(nibbles).collect();

            by_length_map
                .entry(length)
                .or_default()
                .insert(key, vendor.to_string());
        }

        // Longest prefix length first, so lookup() tries the most specific match first.
        let mut by_length: Vec<(usize, HashMap<String, String>)> =
            by_length_map.into_iter().collect();
        by_length.sort_by(|a, b| b.0.cmp(&a.0));

        Self { by_length }
    }

    /// Load from a file path. Any I/O or parse issue yields an empty database
    /// rather than an error — the OUI database is an enrichment, never a
    /// startup blocker (§7 item 6).
    pub fn load(path: impl AsRef<std::path::Path>) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                tracing::warn!(path = %path.as_ref().display(), error = %e, "OUI database unreadable, vendor lookup disabled");
                Self {
                    by_length: Vec::new(),
                }
            }
        }
    }

    /// Look up the vendor name for a MAC address string, trying each known
    /// prefix length longest-to-shortest.
    pub fn lookup(&self, mac: &str) -> Option<&str> {
        let hex: String = mac
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        for (length, table) in &self.by_length {
            let nibbles = length.div_ceil(4);
            if hex.len() < nibbles {
                continue;
            }
            let key: &str = &hex[..nibbles];
            if let Some(vendor) = table.get(key) {
                return Some(vendor.as_str());
            }
        }
        None
    }
}
