//! HTTP clients for the side endpoints and the CDN upload API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use ripple_shared::constants::{
    MAX_MEDIA_SIZE, MEDIA_DELETE_PATH, NOTIFICATION_PATH, UPLOAD_AUTH_PATH,
};
use ripple_shared::protocol::{
    MediaDeleteRequest, NotificationRequest, UploadAuthorization, UploadedMedia,
};

use crate::error::{RemoteError, Result};
use crate::media::{MediaDeleter, MediaSigner, MediaUpload, MediaUploader};
use crate::notify::PushNotifier;

fn build_http(connect_timeout: Duration, timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()?)
}

/// Turn a non-success response into [`RemoteError::Status`].
async fn check_status(res: reqwest::Response) -> Result<reqwest::Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "endpoint request failed");
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Client for the signing / push-trigger / media-delete host.
#[derive(Debug, Clone)]
pub struct EndpointClient {
    http: reqwest::Client,
    base_url: String,
}

impl EndpointClient {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http(connect_timeout, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");
        let res = self.http.post(&url).json(body).send().await?;
        check_status(res).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        Ok(self.post(path, body).await?.json::<T>().await?)
    }
}

#[async_trait]
impl MediaSigner for EndpointClient {
    async fn authorize_upload(&self) -> Result<UploadAuthorization> {
        self.post_json(UPLOAD_AUTH_PATH, &serde_json::json!({})).await
    }
}

#[async_trait]
impl MediaDeleter for EndpointClient {
    async fn delete_media(&self, public_id: &str) -> Result<()> {
        let body = MediaDeleteRequest {
            public_id: public_id.to_string(),
        };
        self.post(MEDIA_DELETE_PATH, &body).await?;
        Ok(())
    }
}

#[async_trait]
impl PushNotifier for EndpointClient {
    async fn notify(&self, request: &NotificationRequest) -> Result<()> {
        self.post(NOTIFICATION_PATH, request).await?;
        Ok(())
    }
}

/// Signed multipart uploads to the CDN.
#[derive(Debug, Clone)]
pub struct CdnUploader {
    http: reqwest::Client,
    base_url: String,
}

impl CdnUploader {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http(connect_timeout, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/{cloud_name}/{resource}/upload`
    pub fn upload_url(&self, auth: &UploadAuthorization, media: &MediaUpload) -> String {
        format!(
            "{}/{}/{}/upload",
            self.base_url,
            auth.cloud_name,
            media.media_type.resource_type()
        )
    }
}

#[async_trait]
impl MediaUploader for CdnUploader {
    async fn upload(
        &self,
        auth: &UploadAuthorization,
        media: MediaUpload,
    ) -> Result<UploadedMedia> {
        if media.len() > MAX_MEDIA_SIZE {
            return Err(RemoteError::TooLarge {
                size: media.len(),
                max: MAX_MEDIA_SIZE,
            });
        }

        let url = self.upload_url(auth, &media);
        let size = media.len();
        let part = multipart::Part::bytes(media.bytes.to_vec()).file_name(media.file_name);
        let form = multipart::Form::new()
            .part("file", part)
            .text("api_key", auth.api_key.clone())
            .text("timestamp", auth.timestamp.to_string())
            .text("signature", auth.signature.clone())
            .text("upload_preset", auth.upload_preset.clone());

        debug!(url = %url, size, "uploading media");
        let res = self.http.post(&url).multipart(form).send().await?;
        let uploaded = check_status(res).await?.json::<UploadedMedia>().await?;
        debug!(public_id = %uploaded.public_id, "media uploaded");
        Ok(uploaded)
    }
}
