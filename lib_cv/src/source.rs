use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use log::debug;
use opencv::core::{Mat, Vector};
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use opencv::{imgcodecs, imgproc};

use crate::error::{Error, Result};

/// Кадр из источника: исходное цветное изображение и его имя для отчёта.
pub struct Frame {
    pub name: String,
    pub image: Mat,
}

impl Frame {
    pub fn gray(&self) -> Result<Mat> {
        to_gray(&self.image)
    }
}

/// Источник кадров: файлы или камера.
pub trait FrameSource {
    /// `Ok(None)` означает конец потока.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

pub fn to_gray(image: &Mat) -> Result<Mat> {
    if image.channels() == 1 {
        return Ok(image.clone());
    }
    let mut gray = Mat::default();
    imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    Ok(gray)
}

pub fn read_image(path: &Path) -> Result<Mat> {
    let image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
    if image.empty() {
        return Err(Error::UnreadableImage(path.to_path_buf()));
    }
    Ok(image)
}

/// Список изображений по папке или шаблону (`imgs/*.png`), в лексикографическом порядке.
pub fn list_images(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vector::<String>::new();
    if let Err(e) = opencv::core::glob(pattern, &mut found, false) {
        debug!("glob {}: {}", pattern, e);
        return Err(Error::NoInput(format!("не найдено изображений: {}", pattern)));
    }
    let mut paths: Vec<PathBuf> = found.iter().map(PathBuf::from).collect();
    paths.sort();
    if paths.is_empty() {
        return Err(Error::NoInput(format!("не найдено изображений: {}", pattern)));
    }
    Ok(paths)
}

pub struct DirectorySource {
    paths: VecDeque<PathBuf>,
}

impl DirectorySource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into(),
        }
    }

    pub fn from_pattern(pattern: &str) -> Result<Self> {
        Ok(Self::new(list_images(pattern)?))
    }

    /// Сколько файлов ещё не выдано.
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for DirectorySource {
    /// Нечитаемый файл даёт `Error::UnreadableImage`, следующий вызов перейдёт к следующему файлу.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let image = read_image(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Some(Frame { name, image }))
    }
}

pub struct CameraSource {
    cap: VideoCapture,
    frame_index: usize,
}

impl CameraSource {
    pub fn open(index: i32) -> Result<Self> {
        let cap = VideoCapture::new(index, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(Error::NoInput(format!("не удалось открыть камеру {}", index)));
        }
        Ok(Self {
            cap,
            frame_index: 0,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut image = Mat::default();
        if !self.cap.read(&mut image)? || image.empty() {
            return Ok(None);
        }
        let name = format!("webcam_{:04}.png", self.frame_index);
        self.frame_index += 1;
        Ok(Some(Frame { name, image }))
    }
}
