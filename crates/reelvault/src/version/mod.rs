//! Fuzzy duplicate detection and version numbering for archive filenames.
//!
//! Release groups name the same film in many ways ("Movie Title 2020.mkv",
//! "Movie.Title.2020.mkv"). Before a file lands in the archive its proposed
//! name is compared against what is already there; close matches get a
//! version suffix instead of clobbering or duplicating the existing copy.

use std::path::Path;

use regex::Regex;

use crate::config::VersioningConfig;
use crate::error::ConfigError;

/// Result of comparing a candidate filename against the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecision {
    /// True when at least one existing file matched above the threshold.
    pub is_duplicate: bool,
    /// 1 for a first copy, otherwise one past the highest existing version.
    pub version_number: u32,
    /// The filename to write, suffix applied when versioning kicked in.
    pub output_filename: String,
}

pub struct VersionResolver {
    enabled: bool,
    suffix_format: String,
    threshold: f64,
    suffix_re: Regex,
}

impl VersionResolver {
    pub fn new(config: &VersioningConfig) -> Result<Self, ConfigError> {
        let pattern = format!(
            "{}$",
            regex::escape(&config.suffix_format).replace(&regex::escape("{number}"), r"(\d+)")
        );
        let suffix_re = Regex::new(&pattern).map_err(|e| ConfigError::Validation {
            message: format!(
                "versioning.suffix_format {:?} does not form a valid pattern: {}",
                config.suffix_format, e
            ),
        })?;
        Ok(Self {
            enabled: config.enabled,
            suffix_format: config.suffix_format.clone(),
            threshold: config.similarity_threshold,
            suffix_re,
        })
    }

    /// Decides the final filename for `candidate` given the destination
    /// directory's current listing.
    pub fn resolve(&self, candidate: &str, existing: &[String]) -> VersionDecision {
        if !self.enabled || existing.is_empty() {
            return VersionDecision {
                is_duplicate: false,
                version_number: 1,
                output_filename: candidate.to_string(),
            };
        }

        let (cand_stem, cand_ext) = split_name(candidate);
        let cand_base = self.strip_suffix(cand_stem);
        let cand_norm = normalize(&cand_base);

        let mut highest_version: u32 = 0;
        for name in existing {
            let (stem, _) = split_name(name);
            let version = self
                .suffix_re
                .captures(stem)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok());
            let base = self.strip_suffix(stem);
            let norm = normalize(&base);

            let matched = norm == cand_norm || similarity(&norm, &cand_norm) >= self.threshold;
            if matched {
                highest_version = highest_version.max(version.unwrap_or(1));
            }
        }

        if highest_version == 0 {
            return VersionDecision {
                is_duplicate: false,
                version_number: 1,
                output_filename: candidate.to_string(),
            };
        }

        let next = highest_version + 1;
        let suffix = self.suffix_format.replace("{number}", &next.to_string());
        VersionDecision {
            is_duplicate: true,
            version_number: next,
            output_filename: format!("{}{}{}", cand_base, suffix, cand_ext),
        }
    }

    fn strip_suffix<'a>(&self, stem: &'a str) -> String {
        self.suffix_re.replace(stem, "").into_owned()
    }
}

/// Splits a filename into (stem, extension-with-dot). A name without an
/// extension comes back with an empty second half.
fn split_name(name: &str) -> (&str, &str) {
    let path = Path::new(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let stem_len = name.len() - ext.len() - 1;
            (&name[..stem_len], &name[stem_len..])
        }
        None => (name, ""),
    }
}

/// Canonical form for comparison: lowercase, separator characters folded
/// to spaces, runs of whitespace collapsed. Scene-style dotted names and
/// spaced names normalize to the same string.
fn normalize(stem: &str) -> String {
    let folded: String = stem
        .to_lowercase()
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity ratio in [0, 1] based on the longest common subsequence:
/// `2 * lcs / (len_a + len_b)`. Equal strings score 1.0.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Two-row DP over the LCS table.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> VersionResolver {
        VersionResolver::new(&VersioningConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_archive_is_never_a_duplicate() {
        let decision = resolver().resolve("Movie Title (2020).mkv", &[]);
        assert!(!decision.is_duplicate);
        assert_eq!(decision.version_number, 1);
        assert_eq!(decision.output_filename, "Movie Title (2020).mkv");
    }

    #[test]
    fn test_dotted_and_spaced_names_collide() {
        let existing = vec!["Movie Title 2020.mkv".to_string()];
        let decision = resolver().resolve("Movie.Title.2020.mkv", &existing);
        assert!(decision.is_duplicate);
        assert_eq!(decision.version_number, 2);
        assert!(decision.output_filename.contains(".v2"));
        assert!(decision.output_filename.ends_with(".mkv"));
    }

    #[test]
    fn test_existing_versions_advance_the_counter() {
        let existing = vec![
            "Movie Title 2020.mkv".to_string(),
            "Movie Title 2020.v2.mkv".to_string(),
        ];
        let decision = resolver().resolve("Movie Title 2020.mkv", &existing);
        assert!(decision.is_duplicate);
        assert_eq!(decision.version_number, 3);
        assert_eq!(decision.output_filename, "Movie Title 2020.v3.mkv");
    }

    #[test]
    fn test_unrelated_titles_do_not_match() {
        let existing = vec!["Completely Different Film 1987.mkv".to_string()];
        let decision = resolver().resolve("Movie Title 2020.mkv", &existing);
        assert!(!decision.is_duplicate);
        assert_eq!(decision.output_filename, "Movie Title 2020.mkv");
    }

    #[test]
    fn test_disabled_resolver_passes_names_through() {
        let config = VersioningConfig {
            enabled: false,
            ..VersioningConfig::default()
        };
        let resolver = VersionResolver::new(&config).unwrap();
        let existing = vec!["Movie Title 2020.mkv".to_string()];
        let decision = resolver.resolve("Movie Title 2020.mkv", &existing);
        assert!(!decision.is_duplicate);
        assert_eq!(decision.output_filename, "Movie Title 2020.mkv");
    }

    #[test]
    fn test_versioned_candidate_is_normalized_before_suffixing() {
        let existing = vec!["Movie Title 2020.v2.mkv".to_string()];
        let decision = resolver().resolve("Movie Title 2020.v2.mkv", &existing);
        assert!(decision.is_duplicate);
        assert_eq!(decision.version_number, 3);
        assert_eq!(decision.output_filename, "Movie Title 2020.v3.mkv");
    }

    #[test]
    fn test_similarity_of_identical_strings() {
        assert!((similarity("abc", "abc") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_similarity_of_disjoint_strings() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_custom_suffix_format() {
        let config = VersioningConfig {
            suffix_format: " [v{number}]".to_string(),
            ..VersioningConfig::default()
        };
        let resolver = VersionResolver::new(&config).unwrap();
        let existing = vec!["Movie Title 2020.mkv".to_string()];
        let decision = resolver.resolve("Movie Title 2020.mkv", &existing);
        assert_eq!(decision.output_filename, "Movie Title 2020 [v2].mkv");
    }
}
