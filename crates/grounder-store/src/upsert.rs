//! Batched, retried upserts.

use futures::{StreamExt, TryStreamExt, stream};
use grounder_embed::{RetryPolicy, with_retry};

use crate::vector_store::{VectorPoint, VectorStore, VectorStoreError};

/// Upsert `points` in chunks of `batch_size`, at most `parallelism` batches in
/// flight, each retried under `retry`. Returns the number of points written.
///
/// # Errors
///
/// Returns the first batch error once that batch's retries are exhausted.
pub async fn upsert_in_batches(
    store: &dyn VectorStore,
    collection: &str,
    points: Vec<VectorPoint>,
    batch_size: usize,
    parallelism: usize,
    retry: &RetryPolicy,
) -> Result<usize, VectorStoreError> {
    let total = points.len();
    let batches: Vec<Vec<VectorPoint>> = points
        .chunks(batch_size.max(1))
        .map(<[VectorPoint]>::to_vec)
        .collect();
    let n_batches = batches.len();

    stream::iter(batches)
        .map(|batch| async move {
            let len = batch.len();
            with_retry(retry, "upsert", || store.upsert(collection, batch.clone())).await?;
            Ok::<_, VectorStoreError>(len)
        })
        .buffer_unordered(parallelism.max(1))
        .try_for_each(|_| async { Ok(()) })
        .await?;

    tracing::debug!(collection, points = total, batches = n_batches, "upsert complete");
    Ok(total)
}
