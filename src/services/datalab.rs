use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;

use crate::core::config::Settings;
use crate::services::providers::{DocumentConversion, DocumentProvider, ProviderStatus};

/// DataLab marker API: PDF in, HTML (or markdown) plus extracted images out.
#[derive(Debug, Clone)]
pub(crate) struct DatalabService {
    client: Client,
    api_key: String,
    base_url: String,
    mode: String,
    output_format: String,
    max_submit_retries: u32,
}

impl DatalabService {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.datalab().timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(timeout)
            .build()
            .context("Failed to build DataLab HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.datalab().api_key.clone(),
            base_url: settings.datalab().base_url.trim_end_matches('/').to_string(),
            mode: settings.datalab().mode.clone(),
            output_format: settings.datalab().output_format.clone(),
            max_submit_retries: settings.datalab().max_submit_retries,
        })
    }

    /// Starts a conversion and returns the vendor request id.
    pub(crate) async fn submit_document(&self, file_url: &str) -> Result<String> {
        let endpoint = format!("{}/marker", self.base_url);

        let mut last_error = None;

        for attempt in 0..=self.max_submit_retries {
            let form = Form::new()
                .text("file_url", file_url.to_string())
                .text("mode", self.mode.clone())
                .text("output_format", self.output_format.clone());

            let response = self
                .client
                .post(&endpoint)
                .header("X-Api-Key", &self.api_key)
                .multipart(form)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let raw_body =
                        resp.text().await.context("Failed to read DataLab marker response")?;
                    let parsed = parse_json_body("DataLab marker", status, &raw_body)?;

                    if !status.is_success() {
                        last_error = Some(anyhow::anyhow!(
                            "DataLab marker submit failed (status {}): {}",
                            status,
                            extract_error_message(&parsed)
                        ));
                    } else if reports_failure(&parsed) {
                        last_error = Some(anyhow::anyhow!(
                            "DataLab marker submit returned success=false: {}",
                            extract_error_message(&parsed)
                        ));
                    } else if let Some(request_id) = extract_request_id(&parsed) {
                        tracing::info!(request_id, attempt, "DataLab conversion submitted");
                        return Ok(request_id);
                    } else {
                        last_error = Some(anyhow::anyhow!(
                            "DataLab marker submit response missing request reference"
                        ));
                    }
                }
                Err(err) => {
                    last_error =
                        Some(anyhow::anyhow!(err).context("Failed to call DataLab marker API"));
                }
            }

            if attempt < self.max_submit_retries {
                let backoff = Duration::from_secs(2_u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown DataLab submit error")))
    }
}

#[async_trait]
impl DocumentProvider for DatalabService {
    async fn check_document(&self, request_id: &str) -> Result<ProviderStatus<DocumentConversion>> {
        let response = self
            .client
            .get(format!("{}/marker/{}", self.base_url, request_id))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .context("Failed to call DataLab marker result endpoint")?;

        let status_code = response.status();
        let raw_body = response.text().await.context("Failed to read DataLab poll response")?;
        let parsed = parse_json_body("DataLab poll", status_code, &raw_body)?;

        if !status_code.is_success() {
            return Err(anyhow::anyhow!(
                "DataLab poll failed (status {}): {}",
                status_code,
                extract_error_message(&parsed)
            ));
        }

        parse_document_status(request_id, &self.output_format, &parsed)
    }
}

fn parse_json_body(source: &str, status: reqwest::StatusCode, raw_body: &str) -> Result<Value> {
    serde_json::from_str::<Value>(raw_body).map_err(|err| {
        anyhow::anyhow!("{source} returned non-JSON body (status {status}): {err}: {raw_body}")
    })
}

fn parse_document_status(
    request_id: &str,
    output_format: &str,
    payload: &Value,
) -> Result<ProviderStatus<DocumentConversion>> {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string());

    if status == "failed" || status == "error" {
        return Err(anyhow::anyhow!(
            "DataLab conversion {} failed: {}",
            request_id,
            extract_error_message(payload)
        ));
    }

    if reports_failure(payload) {
        return Err(anyhow::anyhow!(
            "DataLab conversion {} returned success=false: {}",
            request_id,
            extract_error_message(payload)
        ));
    }

    if status != "complete" && status != "completed" {
        return Ok(ProviderStatus::Pending);
    }

    let conversion = extract_document(output_format, payload).with_context(|| {
        format!("DataLab conversion {request_id} completed without {output_format} output")
    })?;
    Ok(ProviderStatus::Complete(conversion))
}

fn extract_document(output_format: &str, payload: &Value) -> Option<DocumentConversion> {
    let container = payload.get("result").unwrap_or(payload);

    let content = container
        .get(output_format)
        .and_then(Value::as_str)
        .or_else(|| payload.get(output_format).and_then(Value::as_str))?
        .to_string();

    let images = container
        .get("images")
        .or_else(|| payload.get("images"))
        .and_then(Value::as_object)
        .map(|items| {
            items
                .iter()
                .filter_map(|(name, data)| Some((name.clone(), data.as_str()?.to_string())))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    Some(DocumentConversion { content, images })
}

fn reports_failure(payload: &Value) -> bool {
    payload.get("success").and_then(Value::as_bool).is_some_and(|value| !value)
}

fn extract_request_id(payload: &Value) -> Option<String> {
    if let Some(id) = payload.get("request_id").and_then(Value::as_str) {
        return Some(id.to_string());
    }

    if let Some(id) = payload.get("request_check_id").and_then(Value::as_str) {
        return Some(id.to_string());
    }

    payload
        .get("request_check_url")
        .and_then(Value::as_str)
        .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}
