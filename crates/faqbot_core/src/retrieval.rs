use crate::model::EmbeddingVector;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, na, nb) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, aa, bb), (x, y)| {
            (d + (x * y), aa + (x * x), bb + (y * y))
        });

    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let score = dot / (na.sqrt() * nb.sqrt());
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored<P> {
    pub payload: P,
    pub score: f32,
}

/// Ranks `payloads` by similarity of their vectors to `query`.
///
/// Entries scoring below `threshold` are dropped. Equal scores keep corpus
/// order, so the first inserted entry wins a tie.
pub fn search<'a, P>(
    query: &[f32],
    vectors: &[EmbeddingVector],
    payloads: &'a [P],
    threshold: f32,
) -> Vec<Scored<&'a P>> {
    let mut scored: Vec<Scored<&P>> = vectors
        .iter()
        .zip(payloads)
        .map(|(vector, payload)| Scored {
            payload,
            score: cosine_similarity(query, vector),
        })
        .filter(|s| s.score >= threshold)
        .collect();

    // sort_by is stable
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

pub fn top_match<'a, P>(
    query: &[f32],
    vectors: &[EmbeddingVector],
    payloads: &'a [P],
    threshold: f32,
) -> Option<Scored<&'a P>> {
    search(query, vectors, payloads, threshold).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cosine_works_for_unit_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn search_orders_by_score_and_applies_threshold() {
        let vectors = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
        let payloads = ["e1", "e2", "e3"];

        let hits = search(&[0.9, 0.1], &vectors, &payloads, 0.5);
        let ids: Vec<&str> = hits.iter().map(|s| *s.payload).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
        assert!(hits[0].score > 0.9);

        assert!(search(&[0.9, 0.1], &vectors, &payloads, 0.9999).is_empty());
    }

    #[test]
    fn ties_keep_insertion_order() {
        let vectors = vec![vec![2.0, 0.0], vec![1.0, 0.0], vec![3.0, 0.0]];
        let payloads = ["first", "second", "third"];
        let hits = search(&[1.0, 0.0], &vectors, &payloads, 0.7);
        let ids: Vec<&str> = hits.iter().map(|s| *s.payload).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert_eq!(
            top_match(&[1.0, 0.0], &vectors, &payloads, 0.7).map(|s| *s.payload),
            Some("first")
        );
    }

    #[test]
    fn empty_corpus_is_no_match() {
        let payloads: [&str; 0] = [];
        assert!(search(&[1.0], &[], &payloads, 0.0).is_empty());
        assert!(top_match(&[1.0], &[], &payloads, 0.0).is_none());
    }

    fn corpus() -> impl Strategy<Value = (Vec<f32>, Vec<Vec<f32>>)> {
        (1usize..6).prop_flat_map(|dim| {
            (
                prop::collection::vec(0u8..4, dim),
                prop::collection::vec(prop::collection::vec(0u8..4, dim), 0..24),
            )
                .prop_map(|(q, vs)| {
                    (
                        q.into_iter().map(f32::from).collect(),
                        vs.into_iter()
                            .map(|v| v.into_iter().map(f32::from).collect())
                            .collect(),
                    )
                })
        })
    }

    proptest! {
        #[test]
        fn results_sorted_and_ties_stable((query, vectors) in corpus(), threshold in 0.0f32..1.0) {
            let payloads: Vec<usize> = (0..vectors.len()).collect();
            let hits = search(&query, &vectors, &payloads, threshold);
            for pair in hits.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
                if pair[0].score == pair[1].score {
                    prop_assert!(pair[0].payload < pair[1].payload);
                }
            }
            for hit in &hits {
                prop_assert!(hit.score >= threshold);
            }
        }

        #[test]
        fn raising_threshold_only_removes((query, vectors) in corpus(), low in 0.0f32..1.0, bump in 0.0f32..0.5) {
            let payloads: Vec<usize> = (0..vectors.len()).collect();
            let high = low + bump;
            let loose: Vec<usize> = search(&query, &vectors, &payloads, low).iter().map(|s| *s.payload).collect();
            let strict: Vec<usize> = search(&query, &vectors, &payloads, high).iter().map(|s| *s.payload).collect();
            prop_assert!(strict.iter().all(|id| loose.contains(id)));
            prop_assert!(strict.len() <= loose.len());
        }
    }
}
