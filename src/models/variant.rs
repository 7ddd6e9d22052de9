//! Variant path substitution
//!
//! A variant is an alternate build of a component stored in a named folder
//! next to the base file: `unet/model.onnx` has its `RyzenAI` variant at
//! `unet/RyzenAI/model.onnx`.

use std::path::{Path, PathBuf};

/// Redirect `path` to its variant copy when that copy exists on disk
///
/// Returns `path` unchanged when no variant is requested, when the path has
/// no file name, or when the variant file is absent.
pub fn set_variant_model_path(path: &Path, variant: Option<&str>) -> PathBuf {
    let Some(variant) = variant.filter(|v| !v.is_empty()) else {
        return path.to_path_buf();
    };
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };

    let candidate = dir.join(variant).join(file_name);
    if candidate.is_file() {
        tracing::debug!(path = ?candidate, variant, "Using variant model file");
        candidate
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_used_when_present() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("unet/model.onnx");
        let variant = temp_dir.path().join("unet/RyzenAI/model.onnx");
        std::fs::create_dir_all(variant.parent().unwrap()).unwrap();
        std::fs::write(&base, b"base").unwrap();
        std::fs::write(&variant, b"variant").unwrap();

        assert_eq!(set_variant_model_path(&base, Some("RyzenAI")), variant);
    }

    #[test]
    fn test_missing_variant_falls_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("unet/model.onnx");
        std::fs::create_dir_all(base.parent().unwrap()).unwrap();
        std::fs::write(&base, b"base").unwrap();

        assert_eq!(set_variant_model_path(&base, Some("RyzenAI")), base);
    }

    #[test]
    fn test_variant_directory_is_not_a_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("unet/model.onnx");
        // A directory with the model's file name must not count as the variant
        std::fs::create_dir_all(temp_dir.path().join("unet/RyzenAI/model.onnx")).unwrap();

        assert_eq!(set_variant_model_path(&base, Some("RyzenAI")), base);
    }

    #[test]
    fn test_no_variant_requested() {
        let base = PathBuf::from("/m/unet/model.onnx");
        assert_eq!(set_variant_model_path(&base, None), base);
        assert_eq!(set_variant_model_path(&base, Some("")), base);
    }
}
