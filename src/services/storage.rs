use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::core::config::Settings;
use crate::services::inline_images::AssetStore;

#[derive(Debug, Clone)]
pub(crate) struct StorageService {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl StorageService {
    pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if settings.s3().access_key.is_empty() || settings.s3().secret_key.is_empty() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.s3().access_key.clone(),
            settings.s3().secret_key.clone(),
            None,
            None,
            "coursework-conversions-static",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(settings.s3().endpoint.clone())
            .region(aws_config::Region::new(settings.s3().region.clone()))
            .credentials_provider(creds)
            .load()
            .await;

        let client = Client::new(&config);
        let public_base_url = public_base_url(
            settings.s3().public_base_url.as_deref(),
            &settings.s3().endpoint,
            &settings.s3().bucket,
        );

        Ok(Some(Self { client, bucket: settings.s3().bucket.clone(), public_base_url }))
    }

    pub(crate) fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }

    pub(crate) async fn upload_bytes(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("Failed to upload object {key}"))?;

        Ok(())
    }
}

#[async_trait]
impl AssetStore for StorageService {
    async fn store(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        self.upload_bytes(key, content_type, bytes).await?;
        Ok(self.object_url(key))
    }
}

fn public_base_url(configured: Option<&str>, endpoint: &str, bucket: &str) -> String {
    match configured.map(str::trim).filter(|value| !value.is_empty()) {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
    }
}
