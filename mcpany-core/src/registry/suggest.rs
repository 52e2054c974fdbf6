//! Fuzzy suggestions for mistyped tool names.

use strsim::damerau_levenshtein;

/// Maximum edit distance considered a plausible typo.
const SUGGESTION_THRESHOLD: usize = 2;

/// Scan registered keys for the closest match within the threshold. Ties
/// break toward the shorter key, then lexicographically, so suggestions are
/// deterministic.
///
/// An unnamespaced `name` whose qualified form `service.name` exists is
/// always suggested, whatever the raw distance: the caller most likely
/// dropped the namespace.
pub fn suggest<'a, I>(target: &str, candidates: I) -> Option<String>
where
    I: Iterator<Item = &'a str>,
{
    let mut best: Option<(usize, &str)> = None;

    for candidate in candidates {
        let distance = if !target.contains('.')
            && candidate
                .rsplit_once('.')
                .map(|(_, method)| method == target)
                .unwrap_or(false)
        {
            0
        } else {
            damerau_levenshtein(target, candidate)
        };

        if distance > SUGGESTION_THRESHOLD {
            continue;
        }

        best = match best {
            None => Some((distance, candidate)),
            Some((best_distance, best_candidate)) => {
                let better = distance < best_distance
                    || (distance == best_distance
                        && (candidate.len() < best_candidate.len()
                            || (candidate.len() == best_candidate.len()
                                && candidate < best_candidate)));
                if better {
                    Some((distance, candidate))
                } else {
                    Some((best_distance, best_candidate))
                }
            }
        };
    }

    best.map(|(_, candidate)| candidate.to_string())
}
