//! Chunk record to vector store point.

use std::collections::HashMap;

use grounder_embed::SparseVector;
use grounder_store::{DenseVector, VectorPoint};

use crate::error::{IngestError, Result};
use crate::record::ChunkRecord;

/// Build the stored point for `record`: the dense field follows the record's
/// corpus, the sparse field is always present, and the payload carries every
/// record field except `lexical_text`.
///
/// # Errors
///
/// Returns `IngestError::Json` if the record cannot be serialized.
pub fn build_point(
    record: &ChunkRecord,
    dense: Vec<f32>,
    sparse: SparseVector,
) -> Result<VectorPoint> {
    let payload = match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => map.into_iter().collect::<HashMap<_, _>>(),
        other => {
            return Err(IngestError::Other(format!(
                "record serialized to non-object: {other}"
            )));
        }
    };

    Ok(VectorPoint {
        id: record.point_id(),
        dense: DenseVector {
            field: record.corpus.dense_field(),
            values: dense,
        },
        sparse,
        payload,
    })
}
