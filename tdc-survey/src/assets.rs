//! Door image resolution
//!
//! Images are pre-rendered per walking distance and named
//! `door_d2d_{value}.png`. Lookup is by exact value.

use std::path::{Path, PathBuf};
use tdc_common::config::MissingAssetPolicy;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Missing door image for D2D={d2d}: {}", .path.display())]
    Missing { d2d: u32, path: PathBuf },

    #[error("Failed to read door image {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where a door image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorImage {
    File(PathBuf),
    /// Generated stand-in when the file is missing and placeholders are enabled
    Placeholder { d2d: u32 },
}

impl DoorImage {
    pub fn content_type(&self) -> &'static str {
        match self {
            DoorImage::File(_) => "image/png",
            DoorImage::Placeholder { .. } => "image/svg+xml",
        }
    }

    /// Image bytes for serving
    pub async fn bytes(&self) -> Result<Vec<u8>, AssetError> {
        match self {
            DoorImage::File(path) => tokio::fs::read(path).await.map_err(|source| {
                AssetError::Read {
                    path: path.clone(),
                    source,
                }
            }),
            DoorImage::Placeholder { d2d } => Ok(placeholder_svg(*d2d).into_bytes()),
        }
    }
}

/// Maps walking-distance values to image files under one directory
#[derive(Debug, Clone)]
pub struct AssetResolver {
    dir: PathBuf,
    policy: MissingAssetPolicy,
}

impl AssetResolver {
    pub fn new(dir: impl Into<PathBuf>, policy: MissingAssetPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> MissingAssetPolicy {
        self.policy
    }

    /// Path the image for `d2d` is expected at, whether or not it exists
    pub fn path_for(&self, d2d: u32) -> PathBuf {
        self.dir.join(format!("door_d2d_{}.png", d2d))
    }

    /// Resolve the image for `d2d`, applying the missing-asset policy
    pub async fn resolve(&self, d2d: u32) -> Result<DoorImage, AssetError> {
        let path = self.path_for(d2d);
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if is_file {
            return Ok(DoorImage::File(path));
        }

        match self.policy {
            MissingAssetPolicy::Error => Err(AssetError::Missing { d2d, path }),
            MissingAssetPolicy::Placeholder => {
                warn!(d2d, path = %path.display(), "Door image missing, serving placeholder");
                Ok(DoorImage::Placeholder { d2d })
            }
        }
    }
}

fn placeholder_svg(d2d: u32) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="320" height="240" viewBox="0 0 320 240">
<rect width="320" height="240" fill="#e0e0e0"/>
<rect x="110" y="40" width="100" height="170" fill="#9e9e9e" stroke="#616161" stroke-width="4"/>
<text x="160" y="230" font-family="sans-serif" font-size="16" text-anchor="middle" fill="#333">Door at {} m</text>
</svg>"##,
        d2d
    )
}
