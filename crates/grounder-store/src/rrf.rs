//! Reciprocal rank fusion.

use std::collections::HashMap;

use crate::vector_store::ScoredVectorPoint;

/// Rank constant; Qdrant's RRF uses a comparable default.
pub const RRF_K: f32 = 60.0;

/// Fuse ranked lists with `score = Σ 1 / (k + rank)`, rank starting at 1.
///
/// Each input is `(lane name, hits best-first)`. A point's fused entry keeps
/// the payload from its first appearance and records every lane that
/// returned it. Output is sorted by fused score, ties broken by id.
#[must_use]
pub fn fuse(lists: Vec<(String, Vec<ScoredVectorPoint>)>, k: f32, limit: usize) -> Vec<ScoredVectorPoint> {
    let mut fused: HashMap<String, ScoredVectorPoint> = HashMap::new();

    for (lane, hits) in lists {
        for (rank, hit) in hits.into_iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = 1.0 / (k + (rank + 1) as f32);
            let entry = fused.entry(hit.id.clone()).or_insert_with(|| ScoredVectorPoint {
                id: hit.id.clone(),
                score: 0.0,
                payload: hit.payload,
                lanes: Vec::new(),
            });
            entry.score += contribution;
            for l in hit.lanes {
                if !entry.lanes.contains(&l) {
                    entry.lanes.push(l);
                }
            }
            if !entry.lanes.contains(&lane) {
                entry.lanes.push(lane.clone());
            }
        }
    }

    let mut out: Vec<ScoredVectorPoint> = fused.into_values().collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    out.truncate(limit);
    out
}
