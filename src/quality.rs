//! Scoring and selection of search results against a format policy.
//!
//! Everything here is pure: no I/O, no clocks, no shared state. A result is
//! scored from its format rank in the policy, then bonuses for swarm health,
//! freeleech, and (for audiobooks) bitrate. The only hard rejection is an
//! audiobook whose declared bitrate is under the policy floor.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indexer::SearchResult;

/// Score assigned to results that must never be selected.
pub const UNACCEPTABLE_SCORE: i32 = -1;

/// Invalid policy definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The same format appears twice in the preference list.
    #[error("format '{format}' appears more than once in the preference list\n  Suggestion: List each format once, best first")]
    DuplicateFormat {
        /// The repeated format (normalized)
        format: String,
    },
}

/// Ordered format preference plus an optional audiobook bitrate floor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityPolicy {
    formats: Vec<String>,
    min_bitrate_kbps: Option<u32>,
}

impl QualityPolicy {
    /// Creates a policy; formats are normalized to lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::DuplicateFormat`] when a format repeats.
    pub fn new<I, S>(formats: I, min_bitrate_kbps: Option<u32>) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut normalized = Vec::new();
        for format in formats {
            let format = normalize_format(format.as_ref());
            if format.is_empty() {
                continue;
            }
            if !seen.insert(format.clone()) {
                return Err(PolicyError::DuplicateFormat { format });
            }
            normalized.push(format);
        }
        Ok(Self {
            formats: normalized,
            min_bitrate_kbps: min_bitrate_kbps.filter(|floor| *floor > 0),
        })
    }

    /// Returns the normalized preference list, best first.
    #[must_use]
    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Returns the audiobook bitrate floor.
    #[must_use]
    pub fn min_bitrate_kbps(&self) -> Option<u32> {
        self.min_bitrate_kbps
    }

    /// Returns the zero-based rank of `format`, if listed.
    #[must_use]
    pub fn rank_of(&self, format: &str) -> Option<usize> {
        let format = normalize_format(format);
        self.formats.iter().position(|f| *f == format)
    }
}

/// Score assigned to one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    /// `-1` for unacceptable, otherwise `>= 0`.
    pub score: i32,
    /// Whether the format is in the preference list.
    pub matched: bool,
    /// Rank within the preference list, `-1` when unmatched.
    pub rank: i32,
    /// Human-readable breakdown.
    pub reason: String,
}

impl QualityScore {
    /// True unless the result was rejected.
    #[must_use]
    pub fn is_acceptable(&self) -> bool {
        self.score != UNACCEPTABLE_SCORE
    }
}

fn normalize_format(format: &str) -> String {
    format.trim().to_ascii_lowercase()
}

fn seeder_bonus(seeders: u32) -> i32 {
    match seeders {
        10.. => 20,
        5..=9 => 10,
        1..=4 => 5,
        0 => 0,
    }
}

fn bitrate_bonus(bitrate_kbps: u32) -> i32 {
    match bitrate_kbps {
        256.. => 15,
        128..=255 => 10,
        64..=127 => 5,
        _ => 0,
    }
}

/// Scores one result against `policy`.
#[must_use]
pub fn score(result: &SearchResult, policy: &QualityPolicy, is_audiobook: bool) -> QualityScore {
    let Some(rank) = policy.rank_of(&result.format) else {
        return QualityScore {
            score: 0,
            matched: false,
            rank: -1,
            reason: format!("format {} not in preference list", result.format.trim()),
        };
    };
    let rank = i32::try_from(rank).unwrap_or(i32::MAX);

    if is_audiobook
        && let (Some(floor), Some(bitrate)) = (policy.min_bitrate_kbps, result.bitrate_kbps)
        && bitrate > 0
        && bitrate < floor
    {
        return QualityScore {
            score: UNACCEPTABLE_SCORE,
            matched: true,
            rank,
            reason: format!("bitrate {bitrate}kbps below minimum {floor}kbps"),
        };
    }

    let base = 100_i32.saturating_sub(rank.saturating_mul(10)).max(10);
    let mut total = base;
    let mut reason = format!("rank {rank} base {base}");

    let seeders = seeder_bonus(result.seeders);
    if seeders > 0 {
        total += seeders;
        reason.push_str(&format!(", {} seeders +{seeders}", result.seeders));
    }
    if result.freeleech {
        total += 5;
        reason.push_str(", freeleech +5");
    }
    if is_audiobook && let Some(bitrate) = result.bitrate_kbps {
        let bonus = bitrate_bonus(bitrate);
        if bonus > 0 {
            total += bonus;
            reason.push_str(&format!(", {bitrate}kbps +{bonus}"));
        }
    }

    QualityScore {
        score: total,
        matched: true,
        rank,
        reason,
    }
}

/// Scores every result in place.
pub fn score_all(results: &mut [SearchResult], policy: &QualityPolicy, is_audiobook: bool) {
    for result in results.iter_mut() {
        result.quality = Some(score(result, policy, is_audiobook));
    }
}

/// Returns the highest-scoring acceptable result; the earliest wins a tie.
///
/// Returns `None` for an empty list or when every candidate is unacceptable.
#[must_use]
pub fn select_best(
    results: &[SearchResult],
    policy: &QualityPolicy,
    is_audiobook: bool,
) -> Option<SearchResult> {
    let mut best: Option<(i32, &SearchResult, QualityScore)> = None;
    for result in results {
        let scored = score(result, policy, is_audiobook);
        if !scored.is_acceptable() {
            continue;
        }
        if best.as_ref().is_none_or(|(top, _, _)| scored.score > *top) {
            best = Some((scored.score, result, scored));
        }
    }
    best.map(|(_, result, scored)| {
        let mut chosen = result.clone();
        chosen.quality = Some(scored);
        chosen
    })
}

/// Returns every result scored and sorted by score, highest first.
///
/// Equal scores keep their input order. Unacceptable results stay in the
/// list (at the bottom) so manual selection can still show them.
#[must_use]
pub fn rank(
    results: &[SearchResult],
    policy: &QualityPolicy,
    is_audiobook: bool,
) -> Vec<SearchResult> {
    let mut ranked: Vec<SearchResult> = results.to_vec();
    score_all(&mut ranked, policy, is_audiobook);
    ranked.sort_by_key(|result| std::cmp::Reverse(result.score()));
    ranked
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn result(format: &str, seeders: u32, bitrate: Option<u32>) -> SearchResult {
        let mut r = SearchResult::new(format!("Title {format}"), format, "test", "loc");
        r.seeders = seeders;
        r.bitrate_kbps = bitrate;
        r
    }

    fn ebook_policy() -> QualityPolicy {
        QualityPolicy::new(["epub", "azw3", "mobi", "pdf"], None).unwrap()
    }

    #[test]
    fn test_ebook_scenario_prefers_seeded_epub() {
        let policy = ebook_policy();
        let results = vec![result("PDF", 0, None), result("EPUB", 12, None)];

        assert_eq!(score(&results[0], &policy, false).score, 70);
        assert_eq!(score(&results[1], &policy, false).score, 120);

        let best = select_best(&results, &policy, false).unwrap();
        assert_eq!(best.format, "EPUB");
        assert_eq!(best.score(), 120);
    }

    #[test]
    fn test_audiobook_below_floor_is_rejected() {
        let policy = QualityPolicy::new(["m4b", "mp3"], Some(64)).unwrap();
        let results = vec![result("M4B", 50, Some(32)), result("MP3", 0, Some(128))];

        let m4b = score(&results[0], &policy, true);
        assert_eq!(m4b.score, UNACCEPTABLE_SCORE);
        assert!(m4b.matched);
        assert_eq!(score(&results[1], &policy, true).score, 100);

        let best = select_best(&results, &policy, true).unwrap();
        assert_eq!(best.format, "MP3");
    }

    #[test]
    fn test_unmatched_format_scores_zero_and_is_selectable() {
        let policy = ebook_policy();
        let cbz = result("CBZ", 40, None);
        let scored = score(&cbz, &policy, false);
        assert_eq!(scored.score, 0);
        assert!(!scored.matched);
        assert_eq!(scored.rank, -1);
        assert_eq!(select_best(&[cbz], &policy, false).unwrap().format, "CBZ");
    }

    #[test]
    fn test_empty_policy_scores_everything_zero() {
        let policy = QualityPolicy::default();
        assert_eq!(score(&result("EPUB", 100, None), &policy, false).score, 0);
    }

    #[test]
    fn test_base_never_drops_below_ten() {
        let formats: Vec<String> = (0..15).map(|i| format!("f{i}")).collect();
        let policy = QualityPolicy::new(&formats, None).unwrap();
        assert_eq!(score(&result("f14", 0, None), &policy, false).score, 10);
    }

    #[test]
    fn test_bitrate_floor_ignored_for_ebooks_and_missing_bitrate() {
        let policy = QualityPolicy::new(["m4b"], Some(64)).unwrap();
        assert_eq!(score(&result("M4B", 0, Some(32)), &policy, false).score, 100);
        assert_eq!(score(&result("M4B", 0, None), &policy, true).score, 100);
    }

    #[test]
    fn test_select_best_none_when_all_rejected_or_empty() {
        let policy = QualityPolicy::new(["m4b"], Some(64)).unwrap();
        assert!(select_best(&[result("M4B", 0, Some(16))], &policy, true).is_none());
        assert!(select_best(&[], &policy, true).is_none());
    }

    #[test]
    fn test_select_best_first_wins_ties() {
        let policy = ebook_policy();
        let mut first = result("EPUB", 0, None);
        first.title = "first".to_string();
        let mut second = result("EPUB", 0, None);
        second.title = "second".to_string();
        assert_eq!(
            select_best(&[first, second], &policy, false).unwrap().title,
            "first"
        );
    }

    #[test]
    fn test_rank_is_stable_descending() {
        let policy = ebook_policy();
        let mut a = result("PDF", 0, None);
        a.title = "a".to_string();
        let mut b = result("EPUB", 0, None);
        b.title = "b".to_string();
        let mut c = result("PDF", 0, None);
        c.title = "c".to_string();

        let ranked = rank(&[a, b, c], &policy, false);
        let titles: Vec<&str> = ranked.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a", "c"]);
        assert!(ranked.iter().all(|r| r.quality.is_some()));
    }

    #[test]
    fn test_duplicate_formats_rejected() {
        let err = QualityPolicy::new(["epub", "EPUB "], None).unwrap_err();
        assert_eq!(
            err,
            PolicyError::DuplicateFormat {
                format: "epub".to_string()
            }
        );
    }

    #[test]
    fn test_freeleech_and_bitrate_bonuses() {
        let policy = QualityPolicy::new(["m4b"], None).unwrap();
        let mut r = result("M4B", 5, Some(256));
        r.freeleech = true;
        // 100 base + 10 seeders + 5 freeleech + 15 bitrate
        assert_eq!(score(&r, &policy, true).score, 130);
    }
}
