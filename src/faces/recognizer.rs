use image::{DynamicImage, GrayImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{RecallerError, Result};

/// Best match for a face: the label of the closest training sample and how far away it was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i32,
    pub distance: f64,
}

/// Face identity capability used by the recognition stage and the trainer.
pub trait Recognizer: Send {
    fn predict(&self, image: &DynamicImage) -> Result<Prediction>;

    /// Replace the model with one fitted to `images`, one label per image.
    fn train(&mut self, images: &[GrayImage], labels: &[i32]) -> Result<()>;

    fn save(&self, path: &Path) -> Result<()>;
}

/// Offsets of the 8 neighbours at radius 1, clockwise from the top-left.
const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

const BINS: usize = 256;

/// Local binary pattern histograms with chi-square nearest-neighbour matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphRecognizer {
    grid_x: u32,
    grid_y: u32,
    labels: Vec<i32>,
    histograms: Vec<Vec<f32>>,
}

impl Default for LbphRecognizer {
    fn default() -> Self {
        Self::new(8, 8)
    }
}

impl LbphRecognizer {
    pub fn new(grid_x: u32, grid_y: u32) -> Self {
        Self {
            grid_x,
            grid_y,
            labels: Vec::new(),
            histograms: Vec::new(),
        }
    }

    /// Read a model written by [`Recognizer::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| RecallerError::model_load(path.display().to_string(), e))?;
        let model: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| RecallerError::model_load(path.display().to_string(), e))?;
        info!(model = %path.display(), samples = model.labels.len(), "Recognizer model loaded");
        Ok(model)
    }

    pub fn is_trained(&self) -> bool {
        !self.histograms.is_empty()
    }

    pub fn samples(&self) -> usize {
        self.labels.len()
    }

    /// Spatially gridded LBP histogram, each cell normalized to sum to 1.
    fn histogram(&self, image: &GrayImage) -> Result<Vec<f32>> {
        let (width, height) = image.dimensions();
        if width < self.grid_x + 2 || height < self.grid_y + 2 {
            return Err(RecallerError::processing(format!(
                "face image {}x{} too small for a {}x{} grid",
                width, height, self.grid_x, self.grid_y
            )));
        }

        let codes = lbp_codes(image);
        let lbp_w = width - 2;
        let lbp_h = height - 2;

        let cells = (self.grid_x * self.grid_y) as usize;
        let mut hist = vec![0.0f32; cells * BINS];

        for gy in 0..self.grid_y {
            let y0 = gy * lbp_h / self.grid_y;
            let y1 = (gy + 1) * lbp_h / self.grid_y;
            for gx in 0..self.grid_x {
                let x0 = gx * lbp_w / self.grid_x;
                let x1 = (gx + 1) * lbp_w / self.grid_x;

                let offset = (gy * self.grid_x + gx) as usize * BINS;
                let cell = &mut hist[offset..offset + BINS];
                for y in y0..y1 {
                    for x in x0..x1 {
                        cell[codes[(y * lbp_w + x) as usize] as usize] += 1.0;
                    }
                }

                let count = ((x1 - x0) * (y1 - y0)) as f32;
                if count > 0.0 {
                    cell.iter_mut().for_each(|bin| *bin /= count);
                }
            }
        }

        Ok(hist)
    }
}

impl Recognizer for LbphRecognizer {
    fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        if !self.is_trained() {
            return Err(RecallerError::processing("recognizer has no training data"));
        }

        let query = self.histogram(&image.to_luma8())?;
        let (index, distance) = self
            .histograms
            .iter()
            .map(|hist| chi_square(hist, &query))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| RecallerError::processing("recognizer has no training data"))?;

        Ok(Prediction {
            label: self.labels[index],
            distance,
        })
    }

    fn train(&mut self, images: &[GrayImage], labels: &[i32]) -> Result<()> {
        if images.len() != labels.len() {
            return Err(RecallerError::processing(format!(
                "{} training images but {} labels",
                images.len(),
                labels.len()
            )));
        }
        if images.is_empty() {
            return Err(RecallerError::processing("no training images"));
        }

        let histograms = images
            .par_iter()
            .map(|image| self.histogram(image))
            .collect::<Result<Vec<_>>>()?;

        self.histograms = histograms;
        self.labels = labels.to_vec();
        debug!(samples = self.labels.len(), "Recognizer trained");
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        info!(model = %path.display(), samples = self.labels.len(), "Recognizer model saved");
        Ok(())
    }
}

/// 8-bit LBP code for every interior pixel, row-major over a (w-2)×(h-2) grid.
fn lbp_codes(image: &GrayImage) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let mut codes = Vec::with_capacity(((width - 2) * (height - 2)) as usize);

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = image.get_pixel(x, y)[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let nx = (x as i32 + dx) as u32;
                let ny = (y as i32 + dy) as u32;
                if image.get_pixel(nx, ny)[0] >= center {
                    code |= 1 << (7 - bit);
                }
            }
            codes.push(code);
        }
    }

    codes
}

/// Symmetric chi-square distance between two histograms.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let sum = x as f64 + y as f64;
            if sum > f64::EPSILON {
                let diff = x as f64 - y as f64;
                2.0 * diff * diff / sum
            } else {
                0.0
            }
        })
        .sum()
}
