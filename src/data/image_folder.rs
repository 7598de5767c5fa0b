use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::dataset::InMemoryDataset;
use crate::error::{Result, TrainError};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// Per-channel `(x − mean) / std`, applied after scaling pixels to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f64; 3],
    pub std: [f64; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        // Channel statistics of the MIT scene split.
        let stats = [0.4273, 0.4523, 0.4497];
        Normalization { mean: stats, std: stats }
    }
}

impl Normalization {
    pub fn identity() -> Normalization {
        Normalization { mean: [0.0; 3], std: [1.0; 3] }
    }
}

/// Loader for `root/<class>/<image>` trees: one subdirectory per class,
/// classes labelled by their sorted directory names.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub image_size: u32,
    pub normalization: Normalization,
    /// Decode threads; at least one.
    workers: usize,
}

impl ImageFolder {
    pub fn new(image_size: u32, normalization: Normalization, workers: usize) -> ImageFolder {
        ImageFolder { image_size, normalization, workers: workers.max(1) }
    }

    /// Sorted class directory names under `root`.
    pub fn discover_classes(root: &Path) -> Result<Vec<String>> {
        let mut classes = Vec::new();
        for entry in fs::read_dir(root).map_err(|e| TrainError::io(root, e))? {
            let entry = entry.map_err(|e| TrainError::io(root, e))?;
            if entry.path().is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        classes.sort();
        if classes.is_empty() {
            return Err(TrainError::Config(format!(
                "no class directories under {}",
                root.display()
            )));
        }
        Ok(classes)
    }

    /// Loads a split, discovering its classes.
    pub fn load(&self, root: &Path) -> Result<InMemoryDataset> {
        let classes = ImageFolder::discover_classes(root)?;
        self.load_split(root, &classes)
    }

    /// Loads a split against a fixed class list (e.g. `test/` with the
    /// classes found in `train/`). A class directory outside the list is an
    /// error; a listed class may be missing.
    pub fn load_split(&self, root: &Path, classes: &[String]) -> Result<InMemoryDataset> {
        let found = ImageFolder::discover_classes(root)?;
        if let Some(unknown) = found.iter().find(|c| !classes.contains(c)) {
            return Err(TrainError::Config(format!(
                "class directory '{unknown}' in {} is not one of {classes:?}",
                root.display()
            )));
        }

        let mut files: Vec<(PathBuf, usize)> = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let dir = root.join(class);
            if !dir.is_dir() {
                continue;
            }
            let mut class_files: Vec<PathBuf> = fs::read_dir(&dir)
                .map_err(|e| TrainError::io(&dir, e))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            class_files.sort();
            debug!(class = %class, count = class_files.len(), "found images");
            files.extend(class_files.into_iter().map(|p| (p, label)));
        }

        let inputs = self.decode_all(&files)?;
        let labels = files.iter().map(|(_, l)| *l).collect();
        info!(root = %root.display(), samples = files.len(), classes = classes.len(), "loaded image split");
        InMemoryDataset::new(inputs, labels, classes.to_vec())
    }

    /// Decodes every file, splitting the list across `workers` scoped threads.
    /// Output order matches `files`.
    fn decode_all(&self, files: &[(PathBuf, usize)]) -> Result<Vec<Vec<f64>>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = files.len().div_ceil(self.workers);
        thread::scope(|scope| -> Result<Vec<Vec<f64>>> {
            let handles: Vec<_> = files
                .chunks(chunk)
                .map(|part| {
                    scope.spawn(move || {
                        part.iter().map(|(path, _)| self.decode(path)).collect::<Result<Vec<_>>>()
                    })
                })
                .collect();
            let mut out = Vec::with_capacity(files.len());
            for handle in handles {
                let part = handle
                    .join()
                    .map_err(|_| TrainError::Config("image decoding worker panicked".into()))??;
                out.extend(part);
            }
            Ok(out)
        })
    }

    /// One image → channel-major `(3, size, size)` row.
    pub fn decode(&self, path: &Path) -> Result<Vec<f64>> {
        let img = image::open(path).map_err(|source| TrainError::Image { path: path.to_path_buf(), source })?;
        let size = self.image_size;
        let rgb = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();
        let plane = (size * size) as usize;
        let mut row = vec![0.0; 3 * plane];
        for (i, px) in rgb.pixels().enumerate() {
            for c in 0..3 {
                let x = px.0[c] as f64 / 255.0;
                row[c * plane + i] = (x - self.normalization.mean[c]) / self.normalization.std[c];
            }
        }
        Ok(row)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_image_extensions() {
        assert!(is_image(Path::new("a/b.PNG")));
        assert!(is_image(Path::new("x.jpeg")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("no_extension")));
    }

    #[test]
    fn missing_root_is_an_io_error() {
        let err = ImageFolder::discover_classes(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, TrainError::Io { .. }));
    }

    #[test]
    fn default_normalization_matches_dataset_stats() {
        let n = Normalization::default();
        assert_eq!(n.mean, n.std);
        assert_eq!(n.mean[0], 0.4273);
    }

    #[test]
    fn zero_workers_are_clamped_to_one() {
        let tmp = tempfile::tempdir().unwrap();
        let files: Vec<(PathBuf, usize)> = (0..3)
            .map(|i| {
                let path = tmp.path().join(format!("{i}.png"));
                image::RgbImage::from_pixel(3, 3, image::Rgb([10 * i as u8, 0, 0])).save(&path).unwrap();
                (path, 0)
            })
            .collect();

        let folder = ImageFolder::new(2, Normalization::identity(), 0);
        assert_eq!(folder.workers, 1);
        let rows = folder.decode_all(&files).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == 3 * 2 * 2));
    }
}
