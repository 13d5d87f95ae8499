//! Per-cycle variant resolution.
//!
//! Several files may describe the same cycle: real-time, delayed-mode and
//! their BGC/synthetic counterparts. Each file name is reduced to a cycle
//! number and a [`VariantTag`]; per cycle the highest-ranked tag wins and
//! equal ranks fall back to the lexically smallest file name, so the result
//! never depends on listing order.

use floatsync_common::CycleNumber;
use std::collections::BTreeMap;
use tracing::debug;

/// File-name prefix tags ordered by authority.
///
/// The ranking follows Argo naming: synthetic before BGC before core, and
/// delayed-mode before real-time within each family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantTag {
    Unknown = 0,
    RealTime = 1,
    Delayed = 2,
    BgcRealTime = 3,
    BgcDelayed = 4,
    SyntheticRealTime = 5,
    SyntheticDelayed = 6,
}

impl VariantTag {
    /// Longer prefixes first so `SD` is not mistaken for `S` + `D`.
    const PREFIXES: &'static [(&'static str, VariantTag)] = &[
        ("SD", VariantTag::SyntheticDelayed),
        ("SR", VariantTag::SyntheticRealTime),
        ("BD", VariantTag::BgcDelayed),
        ("BR", VariantTag::BgcRealTime),
        ("D", VariantTag::Delayed),
        ("R", VariantTag::RealTime),
    ];

    pub fn from_file_name(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        Self::PREFIXES
            .iter()
            .find(|(prefix, _)| upper.starts_with(prefix))
            .map(|(_, tag)| *tag)
            .unwrap_or(VariantTag::Unknown)
    }

    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// Cycle number of a profile file: the digit run right before the
/// extension, after dropping one trailing `D` (descending-profile marker).
///
/// `R4903220_001.nc` -> 1, `D4903220_001D.nc` -> 1, `SD001.nc` -> 1.
pub fn parse_cycle(name: &str) -> Option<CycleNumber> {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    let stem = stem
        .strip_suffix('D')
        .or_else(|| stem.strip_suffix('d'))
        .unwrap_or(stem);

    let digits_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;

    stem[digits_start..].parse().ok()
}

/// The chosen file for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub name: String,
    pub tag: VariantTag,
}

impl ResolvedFile {
    fn beats(&self, other: &ResolvedFile) -> bool {
        match self.tag.cmp(&other.tag) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.name < other.name,
        }
    }
}

/// Pick exactly one file per cycle, ascending by cycle number.
///
/// Names without a parseable cycle are dropped.
pub fn resolve<S: AsRef<str>>(names: &[S]) -> BTreeMap<CycleNumber, ResolvedFile> {
    let mut best: BTreeMap<CycleNumber, ResolvedFile> = BTreeMap::new();

    for name in names {
        let name = name.as_ref();
        let Some(cycle) = parse_cycle(name) else {
            debug!(file = %name, "Skipping file without cycle number");
            continue;
        };
        let candidate = ResolvedFile {
            name: name.to_string(),
            tag: VariantTag::from_file_name(name),
        };

        match best.get(&cycle) {
            Some(current) if !candidate.beats(current) => {},
            _ => {
                best.insert(cycle, candidate);
            },
        }
    }

    best
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tag_ranks() {
        assert_eq!(VariantTag::from_file_name("SD4903220_001.nc").rank(), 6);
        assert_eq!(VariantTag::from_file_name("SR4903220_001.nc").rank(), 5);
        assert_eq!(VariantTag::from_file_name("BD4903220_001.nc").rank(), 4);
        assert_eq!(VariantTag::from_file_name("BR4903220_001.nc").rank(), 3);
        assert_eq!(VariantTag::from_file_name("D4903220_001.nc").rank(), 2);
        assert_eq!(VariantTag::from_file_name("R4903220_001.nc").rank(), 1);
        assert_eq!(VariantTag::from_file_name("MR4903220_001.nc").rank(), 0);
        assert_eq!(VariantTag::from_file_name("4903220_001.nc").rank(), 0);
    }

    #[test]
    fn test_parse_cycle() {
        assert_eq!(parse_cycle("R4903220_001.nc"), Some(1));
        assert_eq!(parse_cycle("D4903220_001D.nc"), Some(1));
        assert_eq!(parse_cycle("SD001.nc"), Some(1));
        assert_eq!(parse_cycle("R4903220_145.NC"), Some(145));
        assert_eq!(parse_cycle("R4903220_000.nc"), Some(0));
        assert_eq!(parse_cycle("4903220_meta.nc"), None);
        assert_eq!(parse_cycle("notes.nc"), None);
        assert_eq!(parse_cycle("R_99999999999999999999.nc"), None);
    }

    #[test]
    fn test_highest_tag_wins() {
        let resolved = resolve(&["R001.nc", "D001.nc", "SD001.nc"]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&1].name, "SD001.nc");
        assert_eq!(resolved[&1].tag, VariantTag::SyntheticDelayed);
    }

    #[test]
    fn test_equal_rank_prefers_lexically_smaller() {
        let resolved = resolve(&["R4903220_003.nc", "R4903220_003D.nc"]);
        assert_eq!(resolved[&3].name, "R4903220_003.nc");

        let resolved = resolve(&["R4903220_003D.nc", "R4903220_003.nc"]);
        assert_eq!(resolved[&3].name, "R4903220_003.nc");
    }

    #[test]
    fn test_output_is_sorted_and_skips_unparseable() {
        let resolved = resolve(&[
            "R4903220_010.nc",
            "garbage.nc",
            "D4903220_002.nc",
            "R4903220_002.nc",
            "BR4903220_007.nc",
        ]);
        let cycles: Vec<_> = resolved.keys().copied().collect();
        assert_eq!(cycles, vec![2, 7, 10]);
        assert_eq!(resolved[&2].name, "D4903220_002.nc");
    }

    fn file_name() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["", "R", "D", "BR", "BD", "SR", "SD", "MR"]),
            0u32..6,
            prop::bool::ANY,
        )
            .prop_map(|(prefix, cycle, descending)| {
                format!(
                    "{}4903220_{:03}{}.nc",
                    prefix,
                    cycle,
                    if descending { "D" } else { "" }
                )
            })
    }

    proptest! {
        #[test]
        fn prop_resolution_ignores_listing_order(
            names in prop::collection::vec(file_name(), 0..24),
            seed in any::<u64>(),
        ) {
            let forward = resolve(&names);

            let mut shuffled = names.clone();
            shuffled.reverse();
            if !shuffled.is_empty() {
                let k = (seed as usize) % shuffled.len();
                shuffled.rotate_left(k);
            }
            prop_assert_eq!(forward, resolve(&shuffled));
        }

        #[test]
        fn prop_winner_has_max_rank(names in prop::collection::vec(file_name(), 1..24)) {
            let resolved = resolve(&names);
            for (cycle, winner) in &resolved {
                let max_rank = names
                    .iter()
                    .filter(|n| parse_cycle(n) == Some(*cycle))
                    .map(|n| VariantTag::from_file_name(n).rank())
                    .max()
                    .unwrap();
                prop_assert_eq!(winner.tag.rank(), max_rank);
            }
        }
    }
}
