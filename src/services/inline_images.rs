use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::services::providers::DocumentConversion;

/// Object storage for extracted document images. Returns the public URL.
#[async_trait]
pub(crate) trait AssetStore: Send + Sync {
    async fn store(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> Result<String>;
}

/// Replaces the provider's inline image references with stable URLs.
#[derive(Clone, Default)]
pub(crate) struct InlineImageMaterializer {
    assets: Option<Arc<dyn AssetStore>>,
}

impl InlineImageMaterializer {
    pub(crate) fn new(assets: Option<Arc<dyn AssetStore>>) -> Self {
        Self { assets }
    }

    pub(crate) async fn materialize(
        &self,
        owner_scope: &str,
        external_ref: &str,
        document: DocumentConversion,
    ) -> Result<String> {
        let DocumentConversion { mut content, images } = document;

        for (name, encoded) in images {
            if !references(&content, &name) {
                tracing::debug!(external_ref, image = %name, "Skipping unreferenced image");
                continue;
            }

            let encoded = strip_data_prefix(&encoded);
            let bytes = STANDARD.decode(encoded.trim()).with_context(|| {
                format!("Image {name} in conversion {external_ref} is not valid base64")
            })?;
            let extension = extension_of(&name);
            let content_type = content_type_for(&extension);

            let url = match &self.assets {
                Some(assets) => {
                    let key = format!(
                        "conversions/{}/{}/{}.{}",
                        key_segment(owner_scope),
                        key_segment(external_ref),
                        hex::encode(Sha256::digest(&bytes)),
                        extension
                    );
                    assets
                        .store(&key, content_type, bytes)
                        .await
                        .with_context(|| format!("Failed to store image {name}"))?
                }
                None => format!("data:{};base64,{}", content_type, STANDARD.encode(&bytes)),
            };

            content = rewrite_references(&content, &name, &url);
        }

        Ok(content)
    }
}

fn references(content: &str, name: &str) -> bool {
    reference_patterns(name).iter().any(|(pattern, _)| content.contains(pattern.as_str()))
}

fn rewrite_references(content: &str, name: &str, url: &str) -> String {
    reference_patterns(name).into_iter().fold(content.to_string(), |acc, (pattern, wrap)| {
        acc.replace(&pattern, &wrap(url))
    })
}

fn reference_patterns(name: &str) -> [(String, fn(&str) -> String); 3] {
    [
        (format!("src=\"{name}\""), double_quoted_src),
        (format!("src='{name}'"), single_quoted_src),
        (format!("]({name})"), markdown_target),
    ]
}

fn double_quoted_src(url: &str) -> String {
    format!("src=\"{url}\"")
}

fn single_quoted_src(url: &str) -> String {
    format!("src='{url}'")
}

fn markdown_target(url: &str) -> String {
    format!("]({url})")
}

fn strip_data_prefix(encoded: &str) -> &str {
    match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => encoded,
    }
}

fn extension_of(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn key_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
