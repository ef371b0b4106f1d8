use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// List image files directly inside `directory`, sorted by path.
///
/// Extensions are matched case-insensitively. Subdirectories are not descended into.
pub fn discover_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        bail!("{} is not a directory", directory.display());
    }

    let mut images = Vec::new();

    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && has_extension(path, extensions) {
            images.push(path.to_path_buf());
        }
    }

    // Sort by path for consistent ordering
    images.sort();

    Ok(images)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| e.to_lowercase() == ext_lower)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_images() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("b.jpg")).unwrap();
        File::create(dir.path().join("a.PNG")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();

        // Nested images are not part of the set
        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/c.jpeg")).unwrap();

        let extensions = vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()];
        let images = discover_images(dir.path(), &extensions).unwrap();

        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg"]);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let extensions = vec!["jpg".to_string()];
        assert!(discover_images(&dir.path().join("absent"), &extensions).is_err());
    }
}
