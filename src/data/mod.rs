pub mod batch;
pub mod dataset;
pub mod image_folder;

pub use batch::{Batch, BatchSource};
pub use dataset::{DataLoader, InMemoryDataset};
pub use image_folder::{ImageFolder, Normalization};
