use crate::backend::{
    AnalysisPayload, Backend, BackendError, Dendrogram, ExecutionPlan, Heatmap, PhaseResult,
    PlotMetadata,
};
use crate::workbook::UploadedArtifact;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Deterministic test adapter
///
/// Returns a fixed, schema-valid payload without reading the artifact at
/// all. Only reachable through the explicit `fallback` configuration
/// override; selection never degrades to it on its own.
#[derive(Clone, Debug, Default)]
pub struct FallbackBackend;

impl FallbackBackend {
    pub fn new() -> Self {
        FallbackBackend
    }

    fn canned_ids() -> Vec<String> {
        vec!["1".to_string(), "2".to_string(), "3".to_string()]
    }
}

#[async_trait]
impl Backend for FallbackBackend {
    fn label(&self) -> &'static str {
        "fallback"
    }

    fn plan(&self) -> ExecutionPlan {
        ExecutionPlan::TwoPhase
    }

    async fn preprocess(
        &self,
        artifact: &UploadedArtifact,
        _staging: Option<&Path>,
    ) -> Result<PhaseResult, BackendError> {
        info!(
            filename = artifact.filename(),
            size = artifact.len(),
            "fallback backend serving canned preprocess result"
        );
        let ids = Self::canned_ids();
        Ok(PhaseResult {
            normalized_records: ids.iter().map(|id| format!("sample card {id}")).collect(),
            unique_ids: ids.clone(),
            id_url_mapping: ids
                .iter()
                .map(|id| (id.clone(), format!("https://example.invalid/cards/{id}")))
                .collect::<BTreeMap<_, _>>(),
        })
    }

    async fn analyze(&self, phase: PhaseResult) -> Result<AnalysisPayload, BackendError> {
        let n = phase.unique_ids.len();
        // Identity-like similarity: unit diagonal, mild off-diagonal ties
        let z = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { 1.0 } else { 0.25 })
                    .collect::<Vec<f64>>()
            })
            .collect();

        Ok(AnalysisPayload::Plot {
            heatmap: Heatmap {
                z,
                ids: phase.unique_ids.clone(),
            },
            dendrogram: Dendrogram {
                ivl: phase.unique_ids,
                dcoord: vec![vec![0.0, 0.75, 0.75, 0.0], vec![0.0, 1.5, 1.5, 0.75]],
                icoord: vec![vec![5.0, 5.0, 15.0, 15.0], vec![10.0, 10.0, 25.0, 25.0]],
                color_list: Some(vec!["C0".to_string(), "C0".to_string()]),
            },
            metadata: PlotMetadata {
                id_url_mapping: phase.id_url_mapping,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_payload_is_schema_valid_and_ignores_the_artifact() {
        let backend = FallbackBackend::new();
        let artifact = UploadedArtifact::new(vec![0xFF; 4], "anything.bin", "junk/type");

        let phase = backend.preprocess(&artifact, None).await.unwrap();
        assert_eq!(phase.unique_ids.len(), 3);

        let payload = backend.analyze(phase).await.unwrap();
        match payload {
            AnalysisPayload::Plot { heatmap, dendrogram, .. } => {
                assert_eq!(heatmap.z.len(), 3);
                for (i, row) in heatmap.z.iter().enumerate() {
                    assert_eq!(row.len(), 3);
                    assert_eq!(row[i], 1.0);
                }
                assert_eq!(dendrogram.ivl, vec!["1", "2", "3"]);
            }
            AnalysisPayload::Images { .. } => panic!("fallback declares the plot shape"),
        }
    }
}
