//! Media hosting seams: signed upload authorization, CDN upload and delete.

use async_trait::async_trait;
use bytes::Bytes;

use ripple_shared::protocol::{UploadAuthorization, UploadedMedia};
use ripple_shared::MediaType;

use crate::error::Result;

/// A file picked by the user, ready to be uploaded.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub media_type: MediaType,
    pub bytes: Bytes,
}

impl MediaUpload {
    /// Media type is derived from the file extension.
    pub fn from_file(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        Self {
            media_type: MediaType::from_file_name(&file_name),
            file_name,
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Obtains a signed, short-lived upload authorization.
#[async_trait]
pub trait MediaSigner: Send + Sync {
    async fn authorize_upload(&self) -> Result<UploadAuthorization>;
}

/// Uploads bytes to the CDN using a previously obtained authorization.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, auth: &UploadAuthorization, media: MediaUpload)
        -> Result<UploadedMedia>;
}

/// Removes hosted media by its CDN public id.
#[async_trait]
pub trait MediaDeleter: Send + Sync {
    async fn delete_media(&self, public_id: &str) -> Result<()>;
}

/// Recover the CDN public id from a delivery URL.
///
/// `https://res.cloudinary.com/{cloud}/{resource}/upload/v{n}/{folder}/{id}.{ext}`
/// yields `{folder}/{id}`. Raw resources keep their extension, since the CDN
/// stores it as part of the id.
pub fn public_id_from_url(url: &str) -> Option<String> {
    let (head, tail) = url.split_once("/upload/")?;
    let raw = head.ends_with("/raw");

    let tail = tail.split(['?', '#']).next().unwrap_or(tail);
    let mut segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();
    if segments
        .first()
        .is_some_and(|s| s.len() > 1 && s.starts_with('v') && s[1..].bytes().all(|b| b.is_ascii_digit()))
    {
        segments.remove(0);
    }
    let last = segments.pop()?;
    let name = if raw {
        last
    } else {
        last.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(last)
    };
    if name.is_empty() {
        return None;
    }
    segments.push(name);
    Some(segments.join("/"))
}
