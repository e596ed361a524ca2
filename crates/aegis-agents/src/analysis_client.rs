//! HTTP clients for the external analysis services.
//!
//! Each stage is a single JSON POST:
//!
//! | stage    | request                                                  | response                         |
//! |----------|----------------------------------------------------------|----------------------------------|
//! | vision   | `{incidentId, imageUrl}`                                 | `{tag, confidence}`              |
//! | audio    | `{incidentId, audioUrl}`                                 | `{transcript}`                   |
//! | severity | `{incidentId, text, visionTag, transcript, needType}`    | `{severity, needs, summary}`     |

use std::time::Duration;

use async_trait::async_trait;
use coordination::analysis::{AnalysisError, StageAnalyzer};
use coordination::incident::{AnalysisStage, Incident, MediaKind, SeverityResult, VisionResult};
use coordination::store::StageOutput;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisionRequest<'a> {
    incident_id: &'a str,
    image_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioRequest<'a> {
    incident_id: &'a str,
    audio_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeverityRequest<'a> {
    incident_id: &'a str,
    text: &'a str,
    vision_tag: Option<&'a str>,
    transcript: Option<&'a str>,
    need_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    transcript: String,
}

/// A [`StageAnalyzer`] backed by one HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpStageAnalyzer {
    stage: AnalysisStage,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpStageAnalyzer {
    pub fn new(stage: AnalysisStage, url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            stage,
            url: url.into(),
            timeout,
            client,
        })
    }

    fn media_url<'a>(incident: &'a Incident, kind: MediaKind) -> Option<&'a str> {
        incident
            .media
            .as_ref()
            .filter(|m| m.kind == kind)
            .map(|m| m.url.as_str())
    }

    async fn post<B, R>(&self, body: &B) -> Result<R, AnalysisError>
    where
        B: Serialize + ?Sized + Sync,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout(self.timeout)
                } else {
                    AnalysisError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Transport(format!(
                "{} service answered {}: {}",
                self.stage, status, body
            )));
        }

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.timeout)
            } else {
                AnalysisError::Transport(e.to_string())
            }
        })?;
        serde_json::from_str(&text).map_err(|e| AnalysisError::Unparseable(e.to_string()))
    }
}

#[async_trait]
impl StageAnalyzer for HttpStageAnalyzer {
    fn stage(&self) -> AnalysisStage {
        self.stage
    }

    async fn analyze(&self, incident: &Incident) -> Result<StageOutput, AnalysisError> {
        match self.stage {
            AnalysisStage::Vision => {
                let image_url = Self::media_url(incident, MediaKind::Image)
                    .ok_or(AnalysisError::MissingInput("image"))?;
                let result: VisionResult = self
                    .post(&VisionRequest {
                        incident_id: &incident.id,
                        image_url,
                    })
                    .await?;
                Ok(StageOutput::Vision(result))
            }
            AnalysisStage::Audio => {
                let audio_url = Self::media_url(incident, MediaKind::Audio)
                    .ok_or(AnalysisError::MissingInput("audio"))?;
                let result: TranscriptResponse = self
                    .post(&AudioRequest {
                        incident_id: &incident.id,
                        audio_url,
                    })
                    .await?;
                Ok(StageOutput::Transcript(result.transcript))
            }
            AnalysisStage::Severity => {
                let result: SeverityResult = self
                    .post(&SeverityRequest {
                        incident_id: &incident.id,
                        text: &incident.text,
                        vision_tag: incident.vision_result.as_ref().map(|v| v.tag.as_str()),
                        transcript: incident.transcript.as_deref(),
                        need_type: incident.triage.as_ref().map(|t| t.need_type.to_string()),
                    })
                    .await?;
                Ok(StageOutput::Severity(result))
            }
        }
    }
}
