//! Greedy token-budget packing of contiguous source units.

use crate::tokens::estimate_tokens;
use std::ops::Range;

/// A packed group of units: the byte range from the first unit's start to the
/// last unit's end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    pub range: Range<usize>,
    /// Number of units in the group
    pub units: usize,
    /// A single unit that is over budget on its own
    pub oversized: bool,
}

/// Pack `units` (ordered, non-overlapping byte ranges of `source`) into groups
/// whose text fits `max_tokens`.
///
/// Units accumulate until the next one would overflow. The next group then
/// starts with up to `overlap` trailing units of the previous group, fewer if
/// carrying them would not leave room for the next unit. A unit that is over
/// budget on its own becomes a group by itself, flagged `oversized`.
pub fn pack_units(
    source: &str,
    units: &[Range<usize>],
    max_tokens: usize,
    overlap: usize,
) -> Vec<Packed> {
    let fits = |first: usize, last: usize| {
        estimate_tokens(&source[units[first].start..units[last].end]) <= max_tokens
    };

    let mut packed = Vec::new();
    let mut first = 0;
    while first < units.len() {
        let mut last = first;
        while last + 1 < units.len() && fits(first, last + 1) {
            last += 1;
        }
        packed.push(Packed {
            range: units[first].start..units[last].end,
            units: last - first + 1,
            oversized: first == last && !fits(first, first),
        });

        let next = last + 1;
        if next >= units.len() {
            break;
        }

        // Carried units must come from this group and leave the start moving forward.
        let mut carried = overlap.min(last - first);
        while carried > 0 && !fits(next - carried, next) {
            carried -= 1;
        }
        first = next - carried;
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units_of(source: &str, parts: &[&str]) -> Vec<Range<usize>> {
        let mut cursor = 0;
        parts
            .iter()
            .map(|part| {
                let start = source[cursor..].find(part).unwrap() + cursor;
                cursor = start + part.len();
                start..cursor
            })
            .collect()
    }

    #[test]
    fn test_everything_fits_in_one_group() {
        let source = "aaaa bbbb cccc";
        let units = units_of(source, &["aaaa", "bbbb", "cccc"]);
        let packed = pack_units(source, &units, 100, 1);
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].range, 0..source.len());
        assert_eq!(packed[0].units, 3);
    }

    #[test]
    fn test_overlap_carries_previous_unit() {
        // Each unit is 2 tokens; two units with their separator are 5 tokens.
        let source = "aaaaaaaa bbbbbbbb cccccccc";
        let units = units_of(source, &["aaaaaaaa", "bbbbbbbb", "cccccccc"]);
        let packed = pack_units(source, &units, 4, 1);
        let texts: Vec<&str> = packed.iter().map(|p| &source[p.range.clone()]).collect();
        assert_eq!(texts, vec!["aaaaaaaa", "bbbbbbbb", "cccccccc"]);

        let packed = pack_units(source, &units, 5, 1);
        let texts: Vec<&str> = packed.iter().map(|p| &source[p.range.clone()]).collect();
        assert_eq!(texts, vec!["aaaaaaaa bbbbbbbb", "bbbbbbbb cccccccc"]);
    }

    #[test]
    fn test_oversized_unit_is_flagged() {
        let source = "tiny enormous-unit-that-does-not-fit tiny";
        let units = units_of(source, &["tiny", "enormous-unit-that-does-not-fit", "tiny"]);
        let packed = pack_units(source, &units, 3, 0);
        assert_eq!(packed.len(), 3);
        assert!(!packed[0].oversized);
        assert!(packed[1].oversized);
        assert!(!packed[2].oversized);
    }

    #[test]
    fn test_groups_respect_budget() {
        let source = (0..50).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let parts: Vec<String> = (0..50).map(|i| format!("word{i}")).collect();
        let part_refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let units = units_of(&source, &part_refs);
        for group in pack_units(&source, &units, 7, 2) {
            assert!(estimate_tokens(&source[group.range]) <= 7);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(pack_units("", &[], 10, 1).is_empty());
    }
}
