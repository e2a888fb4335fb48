//! Cross-project bulk copy in bounded, strictly sequential batches.
//!
//! Each chunk's request carries the identifier mapping accumulated from all
//! prior chunks; the server needs it to resolve parent references for copied
//! children whose parents were copied earlier. Chunks must therefore never
//! run concurrently.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::transport::single_value_from;

use super::{SyncEngine, SyncError};

/// One bulk-copy invocation.
#[derive(Debug, Clone)]
pub struct BatchCopyRequest {
    /// Entities to copy, in the order the caller wants them processed.
    pub ids: Vec<i64>,
    pub source_project_id: i64,
    pub target_project_id: i64,
    /// Chunk size; `None` uses the configured default.
    pub batch_size: Option<usize>,
}

/// Aggregated result of all chunks of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchCopyOutcome {
    pub copied_count: u64,
    pub related_ids: Vec<i64>,
    /// Source id to copied id, accumulated across every chunk.
    pub id_mapping: BTreeMap<i64, i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CopyChunkReply {
    id_mapping: BTreeMap<i64, i64>,
    copied_count: u64,
    related_ids: Vec<i64>,
}

impl SyncEngine {
    /// Copies entities into another project, chunked to `batch_size`.
    ///
    /// Progress is reported through `on_progress` in percent: a small job
    /// (one chunk) reports 50 before and 100 after the request; a chunked
    /// job reserves the first and last 10% for setup and teardown and
    /// distributes the remaining 80% evenly across chunk completions.
    ///
    /// A failed chunk aborts the job; nothing already merged is committed
    /// anywhere, so the caller treats the error as "no net effect assumed".
    pub fn copy_in_batches<F>(
        &mut self,
        request: &BatchCopyRequest,
        mut on_progress: F,
    ) -> Result<BatchCopyOutcome, SyncError>
    where
        F: FnMut(u8),
    {
        let batch_size = request.batch_size.unwrap_or(self.config().batch_size);
        if batch_size == 0 {
            return Err(SyncError::Validation("batch size must be positive".into()));
        }
        if request.ids.is_empty() {
            debug!("bulk copy invoked with no ids");
            on_progress(100);
            return Ok(BatchCopyOutcome::default());
        }

        let path = format!("{}/krav/kopier", self.config().api_base);
        let mut outcome = BatchCopyOutcome::default();

        if request.ids.len() <= batch_size {
            on_progress(50);
            match self.copy_chunk(&path, request, &request.ids, &outcome.id_mapping) {
                Ok(reply) => merge_reply(&mut outcome, reply),
                Err(SyncError::Transport(source)) => {
                    warn!(chunk = 0, "bulk copy chunk failed, aborting job");
                    return Err(SyncError::BatchAbort { chunk: 0, source });
                }
                Err(other) => return Err(other),
            }
            on_progress(100);
            return Ok(outcome);
        }

        let chunks: Vec<&[i64]> = request.ids.chunks(batch_size).collect();
        let total = chunks.len();
        on_progress(10);
        for (index, chunk) in chunks.into_iter().enumerate() {
            match self.copy_chunk(&path, request, chunk, &outcome.id_mapping) {
                Ok(reply) => merge_reply(&mut outcome, reply),
                Err(SyncError::Transport(source)) => {
                    warn!(chunk = index, "bulk copy chunk failed, aborting job");
                    return Err(SyncError::BatchAbort { chunk: index, source });
                }
                Err(other) => return Err(other),
            }
            on_progress((10 + 80 * (index + 1) / total) as u8);
        }
        on_progress(100);
        Ok(outcome)
    }

    fn copy_chunk(
        &self,
        path: &str,
        request: &BatchCopyRequest,
        ids: &[i64],
        id_mapping: &BTreeMap<i64, i64>,
    ) -> Result<CopyChunkReply, SyncError> {
        let body = json!({
            "ids": ids,
            "sourceProjectId": request.source_project_id,
            "targetProjectId": request.target_project_id,
            "idMapping": id_mapping,
        });
        let response = self.transport().post(path, &body)?;
        serde_json::from_value(single_value_from(&response.data).clone())
            .map_err(|err| SyncError::InvalidResponse(err.to_string()))
    }
}

fn merge_reply(outcome: &mut BatchCopyOutcome, reply: CopyChunkReply) {
    outcome.copied_count += reply.copied_count;
    outcome.related_ids.extend(reply.related_ids);
    // Later entries for the same source id overwrite earlier ones.
    outcome.id_mapping.extend(reply.id_mapping);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedCache;
    use crate::config::EngineConfig;
    use crate::transport::mock::MockTransport;
    use crate::transport::Transport;
    use std::sync::Arc;

    fn engine() -> (SyncEngine, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let engine = SyncEngine::new(
            SharedCache::new(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            EngineConfig::default(),
        );
        (engine, transport)
    }

    fn request(ids: Vec<i64>, batch_size: usize) -> BatchCopyRequest {
        BatchCopyRequest {
            ids,
            source_project_id: 1,
            target_project_id: 2,
            batch_size: Some(batch_size),
        }
    }

    #[test]
    fn test_small_job_is_a_single_request() {
        let (mut engine, transport) = engine();
        transport.push_ok(serde_json::json!({
            "idMapping": {"1": 101, "2": 102},
            "copiedCount": 2,
            "relatedIds": [7],
        }));

        let mut progress = Vec::new();
        let outcome = engine
            .copy_in_batches(&request(vec![1, 2], 30), |p| progress.push(p))
            .unwrap();

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(progress, vec![50, 100]);
        assert_eq!(outcome.copied_count, 2);
        assert_eq!(outcome.related_ids, vec![7]);
        assert_eq!(outcome.id_mapping.get(&1), Some(&101));
    }

    #[test]
    fn test_mapping_propagates_across_sequential_chunks() {
        let (mut engine, transport) = engine();
        let ids: Vec<i64> = (1..=75).collect();
        transport.push_ok(serde_json::json!({
            "idMapping": {"1": 101}, "copiedCount": 30, "relatedIds": [],
        }));
        transport.push_ok(serde_json::json!({
            "idMapping": {"31": 131}, "copiedCount": 30, "relatedIds": [],
        }));
        transport.push_ok(serde_json::json!({
            "idMapping": {"61": 161}, "copiedCount": 15, "relatedIds": [],
        }));

        let outcome = engine
            .copy_in_batches(&request(ids, 30), |_| {})
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);

        // Chunks carry the ids in order.
        let first_ids = requests[0].body.as_ref().unwrap()["ids"].as_array().unwrap().len();
        let last_ids = requests[2].body.as_ref().unwrap()["ids"].as_array().unwrap().len();
        assert_eq!(first_ids, 30);
        assert_eq!(last_ids, 15);

        // The first chunk starts with an empty mapping; later chunks carry
        // everything returned by the chunks before them.
        let mapping0 = &requests[0].body.as_ref().unwrap()["idMapping"];
        assert!(mapping0.as_object().unwrap().is_empty());

        let mapping1 = &requests[1].body.as_ref().unwrap()["idMapping"];
        assert_eq!(mapping1["1"], 101);

        let mapping2 = &requests[2].body.as_ref().unwrap()["idMapping"];
        assert_eq!(mapping2["1"], 101);
        assert_eq!(mapping2["31"], 131);

        assert_eq!(outcome.copied_count, 75);
        assert_eq!(outcome.id_mapping.len(), 3);
    }

    #[test]
    fn test_progress_envelope_for_chunked_job() {
        let (mut engine, transport) = engine();
        for _ in 0..3 {
            transport.push_ok(serde_json::json!({}));
        }

        let mut progress = Vec::new();
        engine
            .copy_in_batches(&request((1..=75).collect(), 30), |p| progress.push(p))
            .unwrap();

        assert_eq!(progress, vec![10, 36, 63, 90, 100]);
    }

    #[test]
    fn test_failed_chunk_aborts_without_further_requests() {
        let (mut engine, transport) = engine();
        transport.push_ok(serde_json::json!({"idMapping": {"1": 101}}));
        transport.push_err(500, "boom");

        let err = engine
            .copy_in_batches(&request((1..=75).collect(), 30), |_| {})
            .unwrap_err();

        assert!(matches!(err, SyncError::BatchAbort { chunk: 1, .. }));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn test_aggregates_merge_with_later_mapping_winning() {
        let (mut engine, transport) = engine();
        transport.push_ok(serde_json::json!({
            "idMapping": {"5": 100}, "copiedCount": 2, "relatedIds": [1],
        }));
        transport.push_ok(serde_json::json!({
            "idMapping": {"5": 200, "6": 300}, "copiedCount": 3, "relatedIds": [2],
        }));

        let outcome = engine
            .copy_in_batches(&request((1..=4).collect(), 2), |_| {})
            .unwrap();

        assert_eq!(outcome.copied_count, 5);
        assert_eq!(outcome.related_ids, vec![1, 2]);
        assert_eq!(outcome.id_mapping.get(&5), Some(&200));
        assert_eq!(outcome.id_mapping.get(&6), Some(&300));
    }

    #[test]
    fn test_empty_job_short_circuits() {
        let (mut engine, transport) = engine();

        let mut progress = Vec::new();
        let outcome = engine
            .copy_in_batches(&request(Vec::new(), 30), |p| progress.push(p))
            .unwrap();

        assert_eq!(outcome, BatchCopyOutcome::default());
        assert!(transport.requests().is_empty());
        assert_eq!(progress, vec![100]);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let (mut engine, transport) = engine();
        let err = engine
            .copy_in_batches(&request(vec![1], 0), |_| {})
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_default_batch_size_comes_from_config() {
        let (mut engine, transport) = engine();
        // 50 ids at the default batch size of 50: single-request path.
        transport.push_ok(serde_json::json!({}));
        let request = BatchCopyRequest {
            ids: (1..=50).collect(),
            source_project_id: 1,
            target_project_id: 2,
            batch_size: None,
        };
        engine.copy_in_batches(&request, |_| {}).unwrap();
        assert_eq!(transport.requests().len(), 1);
    }
}
