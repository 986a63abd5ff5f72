//! Run provider calls over planned batches with bounded concurrency.
//!
//! Batches are issued through `buffered`, so results come back in input order
//! no matter which request finishes first.

use std::ops::Range;

use futures::{StreamExt, TryStreamExt, stream};

use crate::batching::{BatchLimits, WindowLimits, assign_central, plan_batches, plan_windows};
use crate::error::EmbedError;
use crate::provider::{ContextualEmbedder, DenseEmbedder, InputType, SparseEncoder, SparseVector};

fn char_sizes(texts: &[String]) -> Vec<usize> {
    texts.iter().map(|t| t.chars().count()).collect()
}

fn check_len<T>(got: &[T], expected: usize) -> Result<(), EmbedError> {
    if got.len() == expected {
        Ok(())
    } else {
        Err(EmbedError::Shape {
            expected,
            got: got.len(),
        })
    }
}

/// Embed `texts` with a per-text dense embedder, one vector per input.
///
/// # Errors
///
/// Returns the first batch error after that batch's retries are exhausted.
pub async fn embed_texts(
    embedder: &dyn DenseEmbedder,
    texts: &[String],
    input_type: InputType,
    limits: &BatchLimits,
    parallelism: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let batches = plan_batches(&char_sizes(texts), limits);
    tracing::debug!(
        provider = embedder.name(),
        texts = texts.len(),
        batches = batches.len(),
        "dense embedding"
    );

    let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
        .map(|range| {
            let inputs = texts[range.clone()].to_vec();
            async move {
                let vectors = embedder.embed(inputs, input_type).await?;
                check_len(&vectors, range.len())?;
                Ok::<_, EmbedError>(vectors)
            }
        })
        .buffered(parallelism.max(1))
        .try_collect()
        .await?;

    Ok(results.into_iter().flatten().collect())
}

/// Encode `texts` into sparse vectors, batched by item count.
///
/// # Errors
///
/// Returns the first batch error after that batch's retries are exhausted.
pub async fn encode_texts(
    encoder: &dyn SparseEncoder,
    texts: &[String],
    input_type: InputType,
    limits: &BatchLimits,
    parallelism: usize,
) -> Result<Vec<SparseVector>, EmbedError> {
    let batches = plan_batches(&char_sizes(texts), limits);

    let results: Vec<Vec<SparseVector>> = stream::iter(batches)
        .map(|range| {
            let inputs = texts[range.clone()].to_vec();
            async move {
                let vectors = encoder.encode(inputs, input_type).await?;
                check_len(&vectors, range.len())?;
                Ok::<_, EmbedError>(vectors)
            }
        })
        .buffered(parallelism.max(1))
        .try_collect()
        .await?;

    Ok(results.into_iter().flatten().collect())
}

/// Embed the chunks of many files with a contextual embedder.
///
/// Each file is split into overlapping windows under `window.max_chars`;
/// windows from all files are packed into requests under `request` limits.
/// A chunk covered by two windows keeps the embedding from the window where
/// it sits closest to the centre.
///
/// # Errors
///
/// Returns the first request error after that request's retries are exhausted.
pub async fn embed_documents(
    embedder: &dyn ContextualEmbedder,
    files: &[Vec<String>],
    input_type: InputType,
    window: &WindowLimits,
    request: &BatchLimits,
    parallelism: usize,
) -> Result<Vec<Vec<Vec<f32>>>, EmbedError> {
    let mut file_windows: Vec<Vec<Range<usize>>> = Vec::with_capacity(files.len());
    // Flat list of (file, window) with the window's character size.
    let mut flat: Vec<(usize, Range<usize>)> = Vec::new();
    let mut flat_sizes = Vec::new();
    for (fi, chunks) in files.iter().enumerate() {
        let sizes = char_sizes(chunks);
        let windows = plan_windows(&sizes, window);
        for w in &windows {
            flat_sizes.push(sizes[w.clone()].iter().sum());
            flat.push((fi, w.clone()));
        }
        file_windows.push(windows);
    }

    let requests = plan_batches(&flat_sizes, request);
    tracing::debug!(
        provider = embedder.name(),
        files = files.len(),
        windows = flat.len(),
        requests = requests.len(),
        "contextual embedding"
    );

    let flat_ref = &flat;
    let per_request: Vec<Vec<Vec<Vec<f32>>>> = stream::iter(requests)
        .map(|range| {
            let docs: Vec<Vec<String>> = flat_ref[range.clone()]
                .iter()
                .map(|(fi, w)| files[*fi][w.clone()].to_vec())
                .collect();
            async move {
                let expected: Vec<usize> = docs.iter().map(Vec::len).collect();
                let out = embedder.embed_documents(docs, input_type).await?;
                check_len(&out, expected.len())?;
                for (vectors, &n) in out.iter().zip(&expected) {
                    check_len(vectors, n)?;
                }
                Ok::<_, EmbedError>(out)
            }
        })
        .buffered(parallelism.max(1))
        .try_collect()
        .await?;

    // Window embeddings back in flat order, then regrouped by file.
    let mut window_vectors = per_request.into_iter().flatten();
    let mut out = Vec::with_capacity(files.len());
    for (fi, windows) in file_windows.iter().enumerate() {
        let embedded: Vec<Vec<Vec<f32>>> = window_vectors.by_ref().take(windows.len()).collect();
        check_len(&embedded, windows.len())?;
        let picks = assign_central(windows, files[fi].len());
        out.push(
            picks
                .into_iter()
                .map(|(wi, offset)| embedded[wi][offset].clone())
                .collect(),
        );
    }
    Ok(out)
}
