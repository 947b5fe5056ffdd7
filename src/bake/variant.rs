use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One machine-image flavour produced from the reference artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVariant {
    /// Variant name, also the recipe file stem
    pub name: String,

    /// Base image the recipe starts from
    #[serde(default)]
    pub base_image: String,

    /// Image name stem, the variant name when empty. The published name is
    /// `{prefix}{image_base}-{version}`.
    #[serde(default)]
    pub image_base: String,

    /// Recipe path; defaults to `{recipes_dir}/{name}.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<PathBuf>,

    /// Whether the image carries accelerator drivers
    #[serde(default)]
    pub accelerator: bool,
}

impl ImageVariant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_base: String::new(),
            base_image: String::new(),
            recipe: None,
            accelerator: false,
        }
    }

    /// The two variants every release bakes.
    pub fn defaults() -> Vec<ImageVariant> {
        vec![
            ImageVariant {
                name: "cpu".to_string(),
                base_image: "ubuntu-22.04".to_string(),
                image_base: "dstack".to_string(),
                recipe: None,
                accelerator: false,
            },
            ImageVariant {
                name: "cuda".to_string(),
                base_image: "ubuntu-22.04".to_string(),
                image_base: "dstack-cuda-11.1".to_string(),
                recipe: None,
                accelerator: true,
            },
        ]
    }

    /// Resolve the recipe file relative to the recipes directory.
    pub fn recipe_path(&self, recipes_dir: &Path) -> PathBuf {
        match &self.recipe {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => recipes_dir.join(path),
            None => recipes_dir.join(format!("{}.json", self.name)),
        }
    }

    /// Published image name for a version under an environment prefix.
    pub fn image_name(&self, prefix: &str, version: &str) -> String {
        let base = if self.image_base.is_empty() {
            &self.name
        } else {
            &self.image_base
        };
        format!("{}{}-{}", prefix, base, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_variants() {
        let variants = ImageVariant::defaults();
        let names: Vec<_> = variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["cpu", "cuda"]);
        assert!(variants[1].accelerator);
    }

    #[test]
    fn test_recipe_path_defaults_to_variant_name() {
        let variant = ImageVariant::new("cuda");
        assert_eq!(
            variant.recipe_path(Path::new("packer")),
            PathBuf::from("packer/cuda.json")
        );
    }

    #[test]
    fn test_recipe_path_override() {
        let mut variant = ImageVariant::new("cpu");
        variant.recipe = Some(PathBuf::from("custom/cpu.pkr.json"));
        assert_eq!(
            variant.recipe_path(Path::new("packer")),
            PathBuf::from("packer/custom/cpu.pkr.json")
        );
        variant.recipe = Some(PathBuf::from("/abs/cpu.json"));
        assert_eq!(
            variant.recipe_path(Path::new("packer")),
            PathBuf::from("/abs/cpu.json")
        );
    }

    #[test]
    fn test_image_name() {
        let variants = ImageVariant::defaults();
        assert_eq!(variants[0].image_name("", "160"), "dstack-160");
        assert_eq!(
            variants[1].image_name("[stgn] ", "0.7.1"),
            "[stgn] dstack-cuda-11.1-0.7.1"
        );
        assert_eq!(ImageVariant::new("gpu").image_name("", "1"), "gpu-1");
    }
}
