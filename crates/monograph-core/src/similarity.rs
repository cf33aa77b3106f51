//! Near-duplicate estimation and corpus clustering.
//!
//! `distance` is Levenshtein over the flattened plain text, normalized by the
//! longer text. `cluster` is a batch job: it is O(n²) in the worst case, so it
//! runs against a [`ClusterBudget`] and a [`CancelToken`] and reports partial
//! results instead of running unbounded.
//!
//! Pipeline:
//! 1. Exact-hash classes. At threshold 0 these are the answer.
//! 2. One representative per class; character n-gram shingles per
//!    representative, over lowercased text with whitespace collapsed.
//! 3. Candidate pairs come from an inverted shingle index. Documents with no
//!    shared shingle have no textual overlap: they are never compared, so
//!    they can never be merged at any threshold.
//! 4. Greedy complete linkage: a representative joins the first cluster where
//!    every member is a candidate and within the threshold.

use crate::config::SimilarityConfig;
use crate::hasher::ContentHasher;
use crate::types::{Document, DocumentId, Fingerprint, Section};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Flatten sections into the text used for distance. Dynamic blocks contribute
/// their expression source.
pub fn render_plain(sections: &[Section]) -> String {
    sections
        .iter()
        .map(Section::body)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalized edit distance in [0, 1]. Identical texts score 0; texts with
/// nothing in common approach 1.
pub fn distance(a: &[Section], b: &[Section]) -> f64 {
    text_distance(&render_plain(a), &render_plain(b))
}

fn text_distance(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    strsim::levenshtein(a, b) as f64 / longest as f64
}

/// Cooperative cancellation flag shared between the job and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Work limits for a single clustering run.
#[derive(Debug, Clone, Copy)]
pub struct ClusterBudget {
    /// Maximum pairwise distance computations.
    pub max_comparisons: u64,

    /// Absolute wall-clock deadline.
    pub deadline: Option<Instant>,
}

impl ClusterBudget {
    pub fn unlimited() -> Self {
        Self {
            max_comparisons: u64::MAX,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_max_comparisons(mut self, max: u64) -> Self {
        self.max_comparisons = max;
        self
    }
}

impl From<&SimilarityConfig> for ClusterBudget {
    fn from(config: &SimilarityConfig) -> Self {
        ClusterBudget::unlimited()
            .with_max_comparisons(config.max_comparisons)
            .with_timeout(config.max_time())
    }
}

/// Why a run stopped before covering the whole corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    DeadlineExceeded,
    BudgetExhausted,
}

/// Result of a clustering run. When `complete` is false, `clusters` only
/// covers documents processed before the stop and `unprocessed` lists the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterReport {
    pub threshold: f64,
    pub clusters: Vec<BTreeSet<DocumentId>>,
    pub complete: bool,
    pub stop_reason: Option<StopReason>,
    pub comparisons: u64,
    pub unprocessed: Vec<DocumentId>,
}

impl ClusterReport {
    /// Clusters with more than one member.
    pub fn duplicate_clusters(&self) -> impl Iterator<Item = &BTreeSet<DocumentId>> {
        self.clusters.iter().filter(|c| c.len() > 1)
    }
}

struct Representative {
    /// All documents sharing this content hash.
    members: BTreeSet<DocumentId>,
    text: String,
    chars: usize,
    shingles: HashSet<String>,
}

pub struct SimilarityDetector {
    config: SimilarityConfig,
}

impl SimilarityDetector {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Cluster with the budget derived from the configuration.
    pub fn cluster(&self, corpus: &[Document], threshold: f64, cancel: &CancelToken) -> ClusterReport {
        self.cluster_with_budget(corpus, threshold, ClusterBudget::from(&self.config), cancel)
    }

    pub fn cluster_with_budget(
        &self,
        corpus: &[Document],
        threshold: f64,
        budget: ClusterBudget,
        cancel: &CancelToken,
    ) -> ClusterReport {
        let threshold = threshold.clamp(0.0, 1.0);

        // 1. exact classes, keyed deterministically by smallest member id
        let hashed: Vec<(Fingerprint, DocumentId)> = corpus
            .par_iter()
            .map(|doc| (ContentHasher::hash(&doc.sections), doc.id))
            .collect();
        let mut by_hash: HashMap<Fingerprint, (BTreeSet<DocumentId>, usize)> = HashMap::new();
        for (index, (hash, id)) in hashed.iter().enumerate() {
            by_hash
                .entry(*hash)
                .or_insert_with(|| (BTreeSet::new(), index))
                .0
                .insert(*id);
        }
        let mut classes: Vec<(BTreeSet<DocumentId>, usize)> = by_hash.into_values().collect();
        classes.sort_by(|a, b| a.0.iter().next().cmp(&b.0.iter().next()));

        if threshold == 0.0 {
            return ClusterReport {
                threshold,
                clusters: classes.into_iter().map(|(members, _)| members).collect(),
                complete: true,
                stop_reason: None,
                comparisons: 0,
                unprocessed: Vec::new(),
            };
        }

        // 2. representatives
        let ngram = self.config.ngram_size;
        let reps: Vec<Representative> = classes
            .into_par_iter()
            .map(|(members, first)| {
                let text = render_plain(&corpus[first].sections);
                Representative {
                    members,
                    chars: text.chars().count(),
                    shingles: shingles(&text, ngram),
                    text,
                }
            })
            .collect();

        // 3. inverted index
        let mut postings: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, rep) in reps.iter().enumerate() {
            for shingle in &rep.shingles {
                postings.entry(shingle.as_str()).or_default().push(index);
            }
        }

        // 4. greedy complete linkage
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        let mut assignment: Vec<Option<usize>> = vec![None; reps.len()];
        let mut comparisons = 0u64;
        let mut stop_reason = None;
        let mut processed = 0usize;

        'outer: for i in 0..reps.len() {
            if let Some(reason) = check_stop(cancel, &budget) {
                stop_reason = Some(reason);
                break;
            }

            let neighbors: HashSet<usize> = reps[i]
                .shingles
                .iter()
                .filter_map(|sh| postings.get(sh.as_str()))
                .flatten()
                .copied()
                .filter(|&j| j < i)
                .collect();

            let candidate_clusters: BTreeSet<usize> =
                neighbors.iter().filter_map(|&j| assignment[j]).collect();

            let mut joined = None;
            for cluster_index in candidate_clusters {
                let mut fits = true;
                for &member in &clusters[cluster_index] {
                    if !neighbors.contains(&member) {
                        fits = false;
                        break;
                    }
                    if length_bound(&reps[i], &reps[member]) > threshold {
                        fits = false;
                        break;
                    }
                    if comparisons >= budget.max_comparisons {
                        stop_reason = Some(StopReason::BudgetExhausted);
                        break 'outer;
                    }
                    if let Some(reason) = check_stop(cancel, &budget) {
                        stop_reason = Some(reason);
                        break 'outer;
                    }
                    comparisons += 1;
                    if text_distance(&reps[i].text, &reps[member].text) > threshold {
                        fits = false;
                        break;
                    }
                }
                if fits {
                    joined = Some(cluster_index);
                    break;
                }
            }

            match joined {
                Some(cluster_index) => {
                    clusters[cluster_index].push(i);
                    assignment[i] = Some(cluster_index);
                }
                None => {
                    assignment[i] = Some(clusters.len());
                    clusters.push(vec![i]);
                }
            }
            processed = i + 1;
        }

        if let Some(reason) = stop_reason {
            log::warn!(
                "Clustering stopped early ({:?}) after {} comparisons, {}/{} classes processed",
                reason,
                comparisons,
                processed,
                reps.len()
            );
        } else {
            log::info!(
                "Clustered {} documents into {} clusters ({} comparisons)",
                corpus.len(),
                clusters.len(),
                comparisons
            );
        }

        let unprocessed = reps[processed..]
            .iter()
            .flat_map(|rep| rep.members.iter().copied())
            .collect();

        let clusters = clusters
            .into_iter()
            .map(|indexes| {
                indexes
                    .into_iter()
                    .flat_map(|i| reps[i].members.iter().copied())
                    .collect()
            })
            .collect();

        ClusterReport {
            threshold,
            clusters,
            complete: stop_reason.is_none(),
            stop_reason,
            comparisons,
            unprocessed,
        }
    }
}

fn check_stop(cancel: &CancelToken, budget: &ClusterBudget) -> Option<StopReason> {
    if cancel.is_cancelled() {
        return Some(StopReason::Cancelled);
    }
    match budget.deadline {
        Some(deadline) if Instant::now() >= deadline => Some(StopReason::DeadlineExceeded),
        _ => None,
    }
}

/// Lower bound on the normalized distance from lengths alone.
fn length_bound(a: &Representative, b: &Representative) -> f64 {
    let longest = a.chars.max(b.chars);
    if longest == 0 {
        return 0.0;
    }
    a.chars.abs_diff(b.chars) as f64 / longest as f64
}

/// Character n-grams of the normalized text. A text shorter than `n` is one
/// shingle on its own.
fn shingles(text: &str, n: usize) -> HashSet<String> {
    let normalized: Vec<char> = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .collect();
    if normalized.is_empty() {
        return HashSet::new();
    }
    if normalized.len() < n {
        return HashSet::from([normalized.into_iter().collect()]);
    }
    normalized
        .windows(n)
        .map(|w| w.iter().collect())
        .collect()
}

/// Group ids by exact content hash, for callers that only need the exact layer.
pub fn hash_classes(corpus: &[Document]) -> BTreeMap<Fingerprint, BTreeSet<DocumentId>> {
    let mut classes: BTreeMap<Fingerprint, BTreeSet<DocumentId>> = BTreeMap::new();
    for doc in corpus {
        classes
            .entry(ContentHasher::hash(&doc.sections))
            .or_default()
            .insert(doc.id);
    }
    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str, texts: &[&str]) -> Document {
        let sections: Vec<Section> = texts.iter().map(|t| Section::static_text(*t)).collect();
        let hash = ContentHasher::hash(&sections);
        Document::new("test", key, sections, hash)
    }

    fn detector() -> SimilarityDetector {
        SimilarityDetector::new(SimilarityConfig::default())
    }

    #[test]
    fn identical_documents_have_zero_distance() {
        let a = doc("a", &["Potassium chloride", "Dilute before use"]);
        assert_eq!(distance(&a.sections, &a.sections), 0.0);
        assert_eq!(distance(&[], &[]), 0.0);
    }

    #[test]
    fn disjoint_documents_approach_one() {
        let a = vec![Section::static_text("aaaa")];
        let b = vec![Section::static_text("zzzz")];
        assert_eq!(distance(&a, &b), 1.0);
    }

    #[test]
    fn distance_is_normalized_by_longer_text() {
        let a = vec![Section::static_text("abcd")];
        let b = vec![Section::static_text("abcx")];
        assert!((distance(&a, &b) - 0.25).abs() < 1e-9);
        assert!((distance(&b, &a) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn threshold_zero_is_hash_classes() {
        let corpus = vec![
            doc("kcl-north", &["Potassium chloride 10 mmol in 100 mL"]),
            doc("kcl-south", &["Potassium chloride 10 mmol in 100 mL"]),
            doc("kcl-east", &["Potassium chloride 10 mmol in 100 mL."]),
            doc("mag", &["Magnesium sulfate 2 g"]),
        ];
        let report = detector().cluster(&corpus, 0.0, &CancelToken::new());
        assert!(report.complete);
        assert_eq!(report.comparisons, 0);

        let expected: Vec<BTreeSet<DocumentId>> = hash_classes(&corpus).into_values().collect();
        let mut got = report.clusters.clone();
        got.sort();
        let mut expected = expected;
        expected.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn near_duplicates_cluster_together() {
        let corpus = vec![
            doc("a", &["Potassium chloride 10 mmol in 100 mL over 1 hour"]),
            doc("b", &["Potassium chloride 10 mmol in 100 mL over 2 hours"]),
            doc("c", &["Magnesium sulfate 2 g in 50 mL over 20 minutes"]),
        ];
        let report = detector().cluster(&corpus, 0.15, &CancelToken::new());
        assert!(report.complete);
        let dupes: Vec<_> = report.duplicate_clusters().collect();
        assert_eq!(dupes.len(), 1);
        assert!(dupes[0].contains(&corpus[0].id));
        assert!(dupes[0].contains(&corpus[1].id));
        assert!(!dupes[0].contains(&corpus[2].id));
    }

    #[test]
    fn high_threshold_does_not_merge_unrelated_text() {
        let corpus = vec![
            doc("a", &["Potassium chloride"]),
            doc("b", &["Warfarin tablet"]),
            doc("c", &["Glucose gel"]),
        ];
        let report = detector().cluster(&corpus, 1.0, &CancelToken::new());
        assert!(report.complete);
        assert_eq!(report.clusters.len(), 3);
        assert_eq!(report.duplicate_clusters().count(), 0);
    }

    #[test]
    fn short_token_variants_are_compared() {
        let corpus = vec![
            doc("q6h", &["10 mg/kg IV q6h"]),
            doc("q8h", &["10 mg/kg IV q8h"]),
        ];
        assert!(distance(&corpus[0].sections, &corpus[1].sections) <= 0.15);

        let report = detector().cluster(&corpus, 0.15, &CancelToken::new());
        assert!(report.complete);
        assert!(report.comparisons >= 1);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].len(), 2);
    }

    #[test]
    fn shingles_normalize_case_and_whitespace() {
        let a = shingles("IV  q6h", 3);
        let b = shingles("iv q6h", 3);
        assert_eq!(a, b);
        assert!(a.contains("iv "));
        assert_eq!(shingles("IV", 3), HashSet::from(["iv".to_string()]));
        assert!(shingles("   ", 3).is_empty());
    }

    #[test]
    fn complete_linkage_blocks_chaining() {
        // a~b and b~c are close, a and c are not
        let corpus = vec![
            doc("a", &["dose aaaa bbbb"]),
            doc("b", &["dose aaaa cccc"]),
            doc("c", &["dose dddd cccc"]),
        ];
        let report = detector().cluster(&corpus, 0.35, &CancelToken::new());
        for cluster in &report.clusters {
            assert!(!(cluster.contains(&corpus[0].id) && cluster.contains(&corpus[2].id)));
        }
    }

    #[test]
    fn cancelled_job_reports_incomplete() {
        let corpus = vec![doc("a", &["alpha beta"]), doc("b", &["alpha gamma"])];
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = detector().cluster(&corpus, 0.5, &cancel);
        assert!(!report.complete);
        assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(report.unprocessed.len(), 2);
    }

    #[test]
    fn comparison_budget_stops_the_job() {
        let corpus: Vec<Document> = (0..10)
            .map(|i| doc(&format!("d{}", i), &[&format!("shared text variant {}", i)]))
            .collect();
        let budget = ClusterBudget::unlimited().with_max_comparisons(3);
        let report = detector().cluster_with_budget(&corpus, 0.9, budget, &CancelToken::new());
        assert!(!report.complete);
        assert_eq!(report.stop_reason, Some(StopReason::BudgetExhausted));
        assert!(report.comparisons <= 3);

        let covered: usize =
            report.clusters.iter().map(|c| c.len()).sum::<usize>() + report.unprocessed.len();
        assert_eq!(covered, corpus.len());
    }

    #[test]
    fn expired_deadline_stops_the_job() {
        let corpus = vec![doc("a", &["alpha beta"]), doc("b", &["alpha gamma"])];
        let budget = ClusterBudget {
            max_comparisons: u64::MAX,
            deadline: Some(Instant::now()),
        };
        let report = detector().cluster_with_budget(&corpus, 0.5, budget, &CancelToken::new());
        assert_eq!(report.stop_reason, Some(StopReason::DeadlineExceeded));
    }
}
