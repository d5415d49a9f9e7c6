use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, RgbImage};
use walkdir::WalkDir;

use crate::error::{DatasetError, DatasetResult};

/// Extensions accepted as images. Matching is case-sensitive.
pub const IMAGE_EXTENSIONS: [&str; 10] = [
    "jpg", "JPG", "jpeg", "JPEG", "png", "PNG", "ppm", "PPM", "bmp", "BMP",
];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
}

/// Recursively collects image files under `dir` in sorted path order.
///
/// A missing directory or one without any image file is an error.
pub fn collect_images(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DatasetError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|source| DatasetError::DirectoryWalkFailed {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(DatasetError::EmptyDirectory {
            path: dir.to_path_buf(),
        });
    }

    Ok(files)
}

/// Opens an image file, whatever its pixel format.
pub fn load_image(path: &Path) -> DatasetResult<DynamicImage> {
    image::open(path).map_err(|source| DatasetError::ImageLoadFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Lanczos resize to a `size` x `size` RGB image.
pub(crate) fn resize_square(image: &DynamicImage, size: u32) -> RgbImage {
    image
        .resize_exact(size, size, FilterType::Lanczos3)
        .into_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_util::write_images;

    #[test]
    fn collects_images_recursively_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write_images(&dir.path().join("b"), 2, 4, 4);
        write_images(&dir.path().join("a"), 1, 4, 4);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let files = collect_images(dir.path()).unwrap();

        let names: Vec<PathBuf> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a/000.png"),
                PathBuf::from("b/000.png"),
                PathBuf::from("b/001.png"),
            ]
        );
    }

    #[test]
    fn extension_filter_is_case_sensitive() {
        assert!(is_image_file(Path::new("x/IMG.JPG")));
        assert!(is_image_file(Path::new("x/frame.ppm")));
        assert!(!is_image_file(Path::new("x/photo.Jpg")));
        assert!(!is_image_file(Path::new("x/photo.tiff")));
        assert!(!is_image_file(Path::new("x/no_extension")));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = collect_images(&dir.path().join("absent"));

        assert!(matches!(result, Err(DatasetError::DirectoryNotFound { .. })));
    }

    #[test]
    fn directory_without_images_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), "#").unwrap();

        let result = collect_images(dir.path());

        assert!(matches!(result, Err(DatasetError::EmptyDirectory { .. })));
    }

    #[test]
    fn corrupt_image_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let result = load_image(&path);

        assert!(matches!(
            result,
            Err(DatasetError::ImageLoadFailed { path: p, .. }) if p == path
        ));
    }
}
