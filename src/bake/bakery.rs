use super::builder::{BakeRequest, ImageBuilder};
use super::variant::ImageVariant;
use crate::artifact::sha256_hex;
use crate::errors::{BakeError, StoreError};
use crate::promote::distribution_key;
use crate::store::{AccessControl, DistributionEntry, DistributionStore};
use crate::target::BuildTarget;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A machine image produced (or previously recorded) for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakedImage {
    pub variant: String,
    pub version: Version,
    pub image_id: String,
    pub image_name: String,
    /// Hash of every input that determines the image
    pub content_tag: String,
    /// True when an earlier bake with the same inputs was returned
    #[serde(default)]
    pub reused: bool,
}

/// Hash of all bake inputs, including the prefixed image name. Fields are
/// length-prefixed so adjacent values cannot run into each other.
pub fn content_tag(
    variant: &ImageVariant,
    image_name: &str,
    recipe: &[u8],
    artifact_sha256: &str,
    version: &Version,
) -> String {
    let mut hasher = Sha256::new();
    for field in [
        variant.name.as_bytes(),
        variant.base_image.as_bytes(),
        image_name.as_bytes(),
        recipe,
        artifact_sha256.as_bytes(),
        version.as_str().as_bytes(),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

pub fn manifest_key(variant: &str, version: &Version, content_tag: &str) -> String {
    format!("images/{}/{}/{}.json", variant, version, content_tag)
}

/// Bakes machine images from the promoted reference artifact.
pub struct ImageBakery {
    store: Arc<dyn DistributionStore>,
    builder: Arc<dyn ImageBuilder>,
    artifact_name: String,
    reference: BuildTarget,
    recipes_dir: PathBuf,
    staging_dir: PathBuf,
    prefix: String,
}

impl ImageBakery {
    pub fn new(
        store: Arc<dyn DistributionStore>,
        builder: Arc<dyn ImageBuilder>,
        artifact_name: impl Into<String>,
        recipes_dir: impl AsRef<Path>,
        staging_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            store,
            builder,
            artifact_name: artifact_name.into(),
            reference: BuildTarget::REFERENCE,
            recipes_dir: recipes_dir.as_ref().to_path_buf(),
            staging_dir: staging_dir.as_ref().to_path_buf(),
            prefix: String::new(),
        }
    }

    pub fn with_reference(mut self, target: BuildTarget) -> Self {
        self.reference = target;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Bake one variant for a version.
    ///
    /// Must only be called after the release barrier opened. The reference
    /// artifact is read by its versioned key, never through `latest`.
    pub async fn bake(
        &self,
        variant: &ImageVariant,
        version: &Version,
    ) -> Result<BakedImage, BakeError> {
        let fail = |cause: String| BakeError::new(&variant.name, cause);

        let key = distribution_key(version.as_str(), &self.artifact_name, self.reference);
        let entry = self
            .store
            .get(&key)
            .await
            .map_err(|e| fail(format!("Failed to fetch reference artifact: {}", e)))?;
        let actual = sha256_hex(&entry.content);
        if actual != entry.metadata.sha256 {
            return Err(fail(format!(
                "Reference artifact '{}' is corrupt: expected sha256 {}, got {}",
                key, entry.metadata.sha256, actual
            )));
        }

        let recipe = variant.recipe_path(&self.recipes_dir);
        let recipe_bytes = tokio::fs::read(&recipe)
            .await
            .map_err(|e| fail(format!("Failed to read recipe {}: {}", recipe.display(), e)))?;

        let image_name = variant.image_name(&self.prefix, version.as_str());
        let tag = content_tag(variant, &image_name, &recipe_bytes, &actual, version);
        let manifest = manifest_key(&variant.name, version, &tag);
        if let Some(image) = self.recorded(&manifest).await {
            info!(
                variant = %variant.name,
                image_id = %image.image_id,
                "inputs unchanged, reusing recorded image"
            );
            return Ok(image);
        }

        let staged = self
            .stage(variant, version, &entry.content)
            .await
            .map_err(|e| fail(format!("Failed to stage artifact: {}", e)))?;

        let request = BakeRequest {
            variant: variant.clone(),
            version: version.clone(),
            prefix: self.prefix.clone(),
            image_name,
            recipe,
            artifact: staged,
        };

        info!(variant = %variant.name, %version, "bake started");
        let image_id = self
            .builder
            .build_image(&request)
            .await
            .map_err(|e| fail(format!("{:#}", e)))?;

        let image = BakedImage {
            variant: variant.name.clone(),
            version: version.clone(),
            image_id,
            image_name: request.image_name,
            content_tag: tag,
            reused: false,
        };
        self.record(&manifest, &image).await;
        info!(variant = %image.variant, image_id = %image.image_id, "bake succeeded");
        Ok(image)
    }

    async fn recorded(&self, manifest: &str) -> Option<BakedImage> {
        let entry = match self.store.get(manifest).await {
            Ok(entry) => entry,
            Err(StoreError::NotFound { .. }) => return None,
            Err(e) => {
                warn!(key = %manifest, error = %e, "failed to read image manifest, baking again");
                return None;
            }
        };
        match serde_json::from_slice::<BakedImage>(&entry.content) {
            Ok(mut image) => {
                image.reused = true;
                Some(image)
            }
            Err(e) => {
                warn!(key = %manifest, error = %e, "ignoring unreadable image manifest");
                None
            }
        }
    }

    /// A failed manifest write leaves a valid image; the next run bakes again.
    async fn record(&self, manifest: &str, image: &BakedImage) {
        let bytes = match serde_json::to_vec_pretty(image) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %manifest, error = %e, "failed to encode image manifest");
                return;
            }
        };
        let sha = sha256_hex(&bytes);
        let entry = DistributionEntry::new(
            manifest,
            Arc::from(bytes),
            image.version.clone(),
            sha,
            AccessControl::Private,
        );
        if let Err(e) = self.store.put(&entry).await {
            warn!(key = %manifest, error = %e, "failed to record image manifest");
        }
    }

    async fn stage(
        &self,
        variant: &ImageVariant,
        version: &Version,
        content: &[u8],
    ) -> std::io::Result<PathBuf> {
        let dir = self.staging_dir.join(version.as_str()).join(&variant.name);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(self.reference.file_name(&self.artifact_name));
        tokio::fs::write(&path, content).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::promote::ArtifactPromoter;
    use crate::store::MemoryStore;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct FakeBuilder {
        calls: Mutex<Vec<BakeRequest>>,
        fail_variant: Option<String>,
    }

    #[async_trait]
    impl ImageBuilder for FakeBuilder {
        async fn build_image(&self, request: &BakeRequest) -> Result<String> {
            let staged = tokio::fs::read(&request.artifact).await?;
            self.calls.lock().unwrap().push(request.clone());
            if self.fail_variant.as_deref() == Some(request.variant.name.as_str()) {
                bail!("builder quota exceeded");
            }
            Ok(format!(
                "ami-{}-{}-{}",
                request.variant.name,
                request.version,
                staged.len()
            ))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        builder: Arc<FakeBuilder>,
        recipes: TempDir,
        staging: TempDir,
    }

    impl Fixture {
        async fn new(builder: FakeBuilder) -> Self {
            let recipes = tempdir().unwrap();
            for variant in ImageVariant::defaults() {
                std::fs::write(
                    recipes.path().join(format!("{}.json", variant.name)),
                    format!("{{\"variant\": \"{}\"}}", variant.name),
                )
                .unwrap();
            }
            Self {
                store: Arc::new(MemoryStore::new()),
                builder: Arc::new(builder),
                recipes,
                staging: tempdir().unwrap(),
            }
        }

        fn bakery(&self) -> ImageBakery {
            ImageBakery::new(
                self.store.clone(),
                self.builder.clone(),
                "dstack-runner",
                self.recipes.path(),
                self.staging.path(),
            )
        }

        async fn promote_reference(&self, version: &str, bytes: &[u8]) {
            let promoter = ArtifactPromoter::new(self.store.clone(), "dstack-runner");
            let artifact = Artifact::new(
                BuildTarget::REFERENCE,
                Version::new(version),
                bytes.to_vec(),
            );
            assert!(promoter.promote(&artifact).await.is_complete());
        }
    }

    #[tokio::test]
    async fn test_bake_uses_versioned_reference() {
        let fx = Fixture::new(FakeBuilder::default()).await;
        fx.promote_reference("160", b"runner-160").await;
        // A newer run already moved latest on; the bake must not see it.
        fx.promote_reference("161", b"runner-161-longer").await;

        let variant = &ImageVariant::defaults()[0];
        let image = fx
            .bakery()
            .with_prefix("[stgn] ")
            .bake(variant, &Version::new("160"))
            .await
            .unwrap();

        assert_eq!(image.image_id, "ami-cpu-160-10");
        assert_eq!(image.image_name, "[stgn] dstack-160");
        assert!(!image.reused);

        let calls = fx.builder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].version.as_str(), "160");
        assert!(calls[0].recipe.ends_with("cpu.json"));
    }

    #[tokio::test]
    async fn test_bake_records_manifest_and_reuses() {
        let fx = Fixture::new(FakeBuilder::default()).await;
        fx.promote_reference("160", b"runner").await;
        let bakery = fx.bakery();
        let variant = &ImageVariant::defaults()[1];
        let version = Version::new("160");

        let first = bakery.bake(variant, &version).await.unwrap();
        let second = bakery.bake(variant, &version).await.unwrap();

        assert_eq!(fx.builder.calls.lock().unwrap().len(), 1);
        assert!(second.reused);
        assert_eq!(second.image_id, first.image_id);
        assert_eq!(second.content_tag, first.content_tag);

        let manifest = manifest_key("cuda", &version, &first.content_tag);
        let stored = fx.store.get(&manifest).await.unwrap();
        assert_eq!(stored.metadata.access, AccessControl::Private);
    }

    #[tokio::test]
    async fn test_changed_recipe_bakes_again() {
        let fx = Fixture::new(FakeBuilder::default()).await;
        fx.promote_reference("160", b"runner").await;
        let bakery = fx.bakery();
        let variant = &ImageVariant::defaults()[0];
        let version = Version::new("160");

        let first = bakery.bake(variant, &version).await.unwrap();
        std::fs::write(fx.recipes.path().join("cpu.json"), "{\"changed\": true}").unwrap();
        let second = bakery.bake(variant, &version).await.unwrap();

        assert_ne!(first.content_tag, second.content_tag);
        assert!(!second.reused);
        assert_eq!(fx.builder.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_reference_fails() {
        let fx = Fixture::new(FakeBuilder::default()).await;
        let err = fx
            .bakery()
            .bake(&ImageVariant::defaults()[0], &Version::new("160"))
            .await
            .unwrap_err();
        assert_eq!(err.variant, "cpu");
        assert!(err.cause.contains("Failed to fetch reference artifact"));
        assert!(fx.builder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_reference_fails() {
        let fx = Fixture::new(FakeBuilder::default()).await;
        let key = distribution_key("160", "dstack-runner", BuildTarget::REFERENCE);
        fx.store
            .put(&DistributionEntry::new(
                key,
                Arc::from(&b"tampered"[..]),
                Version::new("160"),
                sha256_hex(b"original"),
                AccessControl::PublicRead,
            ))
            .await
            .unwrap();

        let err = fx
            .bakery()
            .bake(&ImageVariant::defaults()[0], &Version::new("160"))
            .await
            .unwrap_err();
        assert!(err.cause.contains("corrupt"));
    }

    #[tokio::test]
    async fn test_variants_fail_independently() {
        let fx = Fixture::new(FakeBuilder {
            fail_variant: Some("cuda".to_string()),
            ..Default::default()
        })
        .await;
        fx.promote_reference("160", b"runner").await;

        let bakery = fx.bakery();
        let version = Version::new("160");
        let variants = ImageVariant::defaults();
        let (cpu, cuda) = tokio::join!(
            bakery.bake(&variants[0], &version),
            bakery.bake(&variants[1], &version)
        );

        assert!(cpu.is_ok());
        let err = cuda.unwrap_err();
        assert_eq!(err.variant, "cuda");
        assert!(err.cause.contains("quota exceeded"));
    }

    #[test]
    fn test_content_tag_covers_every_input() {
        let variant = ImageVariant::defaults()[0].clone();
        let version = Version::new("160");
        let name = "dstack-160";
        let base = content_tag(&variant, name, b"recipe", "abc", &version);

        assert_eq!(base, content_tag(&variant, name, b"recipe", "abc", &version));
        assert_ne!(base, content_tag(&variant, name, b"recipe2", "abc", &version));
        assert_ne!(base, content_tag(&variant, name, b"recipe", "abd", &version));
        assert_ne!(
            base,
            content_tag(&variant, name, b"recipe", "abc", &Version::new("161"))
        );
        assert_ne!(
            base,
            content_tag(&variant, "[stgn] dstack-160", b"recipe", "abc", &version)
        );

        let mut other = variant.clone();
        other.base_image = "ubuntu-24.04".to_string();
        assert_ne!(base, content_tag(&other, name, b"recipe", "abc", &version));
    }

    #[tokio::test]
    async fn test_prefix_change_bakes_again() {
        let fx = Fixture::new(FakeBuilder::default()).await;
        fx.promote_reference("160", b"runner").await;
        let variant = &ImageVariant::defaults()[0];
        let version = Version::new("160");

        let staging = fx
            .bakery()
            .with_prefix("[stgn] ")
            .bake(variant, &version)
            .await
            .unwrap();
        let production = fx.bakery().bake(variant, &version).await.unwrap();

        assert_eq!(fx.builder.calls.lock().unwrap().len(), 2);
        assert_eq!(staging.image_name, "[stgn] dstack-160");
        assert_eq!(production.image_name, "dstack-160");
        assert!(!production.reused);
        assert_ne!(staging.content_tag, production.content_tag);

        // Each environment reuses its own record.
        let again = fx.bakery().bake(variant, &version).await.unwrap();
        assert!(again.reused);
        assert_eq!(again.image_name, "dstack-160");
        assert_eq!(fx.builder.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_manifest_bakes_again() {
        let fx = Fixture::new(FakeBuilder::default()).await;
        fx.promote_reference("160", b"runner").await;
        let bakery = fx.bakery();
        let variant = &ImageVariant::defaults()[0];
        let version = Version::new("160");

        let first = bakery.bake(variant, &version).await.unwrap();
        let manifest = manifest_key("cpu", &version, &first.content_tag);
        fx.store
            .put(&DistributionEntry::new(
                manifest,
                Arc::from(&b"not json"[..]),
                version.clone(),
                sha256_hex(b"not json"),
                AccessControl::Private,
            ))
            .await
            .unwrap();

        let second = bakery.bake(variant, &version).await.unwrap();
        assert!(!second.reused);
        assert_eq!(fx.builder.calls.lock().unwrap().len(), 2);
    }
}
