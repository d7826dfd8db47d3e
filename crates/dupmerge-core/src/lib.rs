//! Core domain model and grouping-key derivation for duplicate merge suggestions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "dupmerge-core";

/// Marker token preceding the sub-identifier embedded in the product tag field.
pub const PRODUCT_ID_MARKER: &str = "ProductID: ";

/// SQL form of [`grouping_key`]. Kept byte-identical to the expression the
/// existing `product_duplicates.title` rows were produced with, so newly
/// derived keys stay comparable with persisted titles.
pub const GROUP_TITLE_SQL: &str = "CONCAT(UPPER(SUBSTRING_INDEX(SUBSTRING_INDEX(tags, 'ProductID: ', -1), ',', 1)), '-', UPPER(category), '-', gender)";

/// One member of a duplicate cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub product_id: u64,
    pub external_id: String,
}

/// Typed row of the duplicate detail query: derived key plus both product
/// identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateDetailRow {
    pub group_title: String,
    pub product_id: u64,
    pub external_id: String,
}

/// Derive the canonical grouping key from the noisy product attributes.
///
/// Mirrors [`GROUP_TITLE_SQL`]: the sub-identifier is whatever follows the
/// last marker occurrence in the tag field, truncated at the next comma. A
/// missing comma leaves the remainder untruncated and a missing marker
/// degrades to the whole tag field. The marker search is case-insensitive,
/// matching the catalog's ci collation.
pub fn grouping_key(tags: &str, category: &str, gender: &str) -> String {
    format!(
        "{}-{}-{}",
        sub_identifier(tags).to_uppercase(),
        category.to_uppercase(),
        gender.to_uppercase()
    )
}

fn sub_identifier(tags: &str) -> &str {
    // ASCII-lowercasing keeps byte offsets stable, so the match position can
    // index back into the original string.
    let haystack = tags.to_ascii_lowercase();
    let needle = PRODUCT_ID_MARKER.to_ascii_lowercase();
    let after = match haystack.rfind(&needle) {
        Some(pos) => &tags[pos + needle.len()..],
        None => tags,
    };
    match after.find(',') {
        Some(comma) => &after[..comma],
        None => after,
    }
}

/// Fold detail rows into a key -> members mapping, preserving row order
/// within each key's member list.
pub fn group_duplicates(rows: &[DuplicateDetailRow]) -> BTreeMap<String, Vec<ProductRef>> {
    let mut grouped: BTreeMap<String, Vec<ProductRef>> = BTreeMap::new();
    for row in rows {
        grouped
            .entry(row.group_title.clone())
            .or_default()
            .push(ProductRef {
                product_id: row.product_id,
                external_id: row.external_id.clone(),
            });
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_key_is_deterministic_and_case_insensitive() {
        let a = grouping_key("X ProductID: abc123, foo", "Shoes", "M");
        let b = grouping_key("x productid: ABC123, bar", "shoes", "m");
        assert_eq!(a, "ABC123-SHOES-M");
        assert_eq!(a, b);
    }

    #[test]
    fn grouping_key_uses_last_marker_occurrence() {
        let key = grouping_key("old ProductID: X9, note ProductID: Y7, rest", "Boots", "F");
        assert_eq!(key, "Y7-BOOTS-F");
    }

    #[test]
    fn grouping_key_without_comma_keeps_remainder() {
        let key = grouping_key("winter ProductID: Z42", "Coats", "U");
        assert_eq!(key, "Z42-COATS-U");
    }

    #[test]
    fn grouping_key_without_marker_degrades_to_tag_field() {
        // No marker: the whole tag field feeds the comma truncation step,
        // exactly as SUBSTRING_INDEX behaves on a missing needle.
        assert_eq!(grouping_key("plain tags", "Hats", "U"), "PLAIN TAGS-HATS-U");
        assert_eq!(grouping_key("red, blue", "Hats", "U"), "RED-HATS-U");
    }

    #[test]
    fn group_duplicates_preserves_row_order_per_key() {
        let rows = vec![
            DuplicateDetailRow {
                group_title: "A1-SHOES-M".into(),
                product_id: 3,
                external_id: "e3".into(),
            },
            DuplicateDetailRow {
                group_title: "B2-BOOTS-F".into(),
                product_id: 9,
                external_id: "e9".into(),
            },
            DuplicateDetailRow {
                group_title: "A1-SHOES-M".into(),
                product_id: 1,
                external_id: "e1".into(),
            },
        ];

        let grouped = group_duplicates(&rows);
        assert_eq!(grouped.len(), 2);
        let members = &grouped["A1-SHOES-M"];
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].product_id, 3);
        assert_eq!(members[1].product_id, 1);
        assert_eq!(grouped["B2-BOOTS-F"][0].external_id, "e9");
    }

    #[test]
    fn group_duplicates_of_nothing_is_empty() {
        assert!(group_duplicates(&[]).is_empty());
    }
}
