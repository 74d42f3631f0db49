//! CelebA face attributes read from the aligned-image release on disk.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use burn::data::dataset::Dataset;
use image::imageops::FilterType;
use rand::RngCore;

use super::{
    image::{Image, ImageItem},
    transform::{Compose, Normalize, Transform},
};
use crate::error::DataError;

pub const NUM_ATTRIBUTES: usize = 40;
pub const IMG_CHANNELS: usize = 3;
pub const IMAGE_DIR: &str = "img_align_celeba";
pub const ATTR_FILE: &str = "list_attr_celeba.txt";
pub const PARTITION_FILE: &str = "list_eval_partition.txt";

/// Per-channel mean in BGR order, on the `[0, 255]` scale.
pub const MEAN_BGR: [f32; 3] = [73.158_36, 82.908_92, 72.392_4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    fn partition(self) -> u8 {
        match self {
            Split::Train => 0,
            Split::Val => 1,
            Split::Test => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub file: String,
    pub attributes: Vec<i64>,
}

/// Reverses the channel order (RGB <-> BGR).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseChannels;

impl Transform for ReverseChannels {
    fn apply(&self, mut image: Image, _rng: &mut dyn RngCore) -> Image {
        let c = image.channels;
        image.pixels.chunks_mut(c).for_each(|px| px.reverse());
        image
    }
}

pub fn preprocessing() -> Compose {
    let mean = MEAN_BGR.map(|m| m / 255.0);
    Compose::new()
        .then(ReverseChannels)
        .then(Normalize::new(&mean, &[1.0; 3]))
}

/// Parses `list_attr_celeba.txt`: a count line, a header of attribute names,
/// then one `<file> <±1 x 40>` row per image. `-1` becomes `0`.
pub fn parse_attributes(text: &str) -> Result<Vec<Entry>, DataError> {
    let malformed = |line: usize| DataError::MalformedLine {
        file: ATTR_FILE.to_string(),
        line,
    };

    text.lines()
        .enumerate()
        .skip(2)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let mut fields = line.split_whitespace();
            let file = fields.next().ok_or_else(|| malformed(i + 1))?.to_string();
            let attributes = fields
                .map(|v| match v {
                    "1" => Ok(1),
                    "-1" | "0" => Ok(0),
                    _ => Err(malformed(i + 1)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            if attributes.len() != NUM_ATTRIBUTES {
                return Err(malformed(i + 1));
            }
            Ok(Entry { file, attributes })
        })
        .collect()
}

/// Parses `list_eval_partition.txt` into file -> partition id.
pub fn parse_partitions(text: &str) -> Result<HashMap<String, u8>, DataError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next().and_then(|p| p.parse::<u8>().ok())) {
                (Some(file), Some(partition)) => Ok((file.to_string(), partition)),
                _ => Err(DataError::MalformedLine {
                    file: PARTITION_FILE.to_string(),
                    line: i + 1,
                }),
            }
        })
        .collect()
}

pub struct CelebaDataset {
    image_dir: PathBuf,
    entries: Vec<Entry>,
    img_size: (u32, u32),
    preprocess: Compose,
}

impl CelebaDataset {
    pub fn new(
        root: impl AsRef<Path>,
        split: Split,
        img_rows: u32,
        img_cols: u32,
    ) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let attr_path = root.join(ATTR_FILE);
        let partition_path = root.join(PARTITION_FILE);

        let attrs = std::fs::read_to_string(&attr_path)
            .with_context(|| format!("reading {}", attr_path.display()))?;
        let partitions = std::fs::read_to_string(&partition_path)
            .with_context(|| format!("reading {}", partition_path.display()))?;

        let partitions = parse_partitions(&partitions)?;
        let entries = parse_attributes(&attrs)?
            .into_iter()
            .filter(|e| partitions.get(&e.file) == Some(&split.partition()))
            .collect::<Vec<_>>();
        log::info!("CelebA - {split:?}: {}", entries.len());

        Ok(Self::from_entries(root.join(IMAGE_DIR), entries, (img_rows, img_cols)))
    }

    /// Keeps only the entries whose image header can be read, so that `get`
    /// yields an item for every index below `len()`.
    pub fn from_entries(image_dir: PathBuf, entries: Vec<Entry>, img_size: (u32, u32)) -> Self {
        let total = entries.len();
        let entries = entries
            .into_iter()
            .filter(|entry| {
                let path = image_dir.join(&entry.file);
                match image::image_dimensions(&path) {
                    Ok(_) => true,
                    Err(err) => {
                        log::warn!("dropping {}: {err}", path.display());
                        false
                    }
                }
            })
            .collect::<Vec<_>>();
        if entries.len() < total {
            log::warn!("CelebA - dropped {} unreadable images", total - entries.len());
        }

        Self {
            image_dir,
            entries,
            img_size,
            preprocess: preprocessing(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

impl Dataset<ImageItem> for CelebaDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let entry = self.entries.get(index)?;
        let path = self.image_dir.join(&entry.file);
        let (rows, cols) = self.img_size;
        let image = match image::open(&path) {
            Ok(img) => {
                let img = img.resize_exact(cols, rows, FilterType::Triangle);
                Image::from_dynamic(&img, IMG_CHANNELS)
            }
            // the header was readable when the dataset was built
            Err(err) => {
                log::error!("{} became unreadable, using a blank image: {err}", path.display());
                Image::zeros(rows as usize, cols as usize, IMG_CHANNELS)
            }
        };
        let image = self.preprocess.apply(image, &mut rand::thread_rng());

        Some(ImageItem {
            image,
            labels: entry.attributes.clone(),
        })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
