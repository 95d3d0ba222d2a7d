use std::fs::create_dir_all;
use std::path::PathBuf;

use log::info;
use opencv::core::{Mat, Point, Scalar, Vector};
use opencv::objdetect::{draw_detected_corners_charuco, draw_detected_markers};
use opencv::prelude::*;
use opencv::{calib3d, highgui, imgcodecs, imgproc};

use crate::calibration::Intrinsics;
use crate::detection::DetectionResult;
use crate::error::Result;
use crate::pose::PoseEstimate;
use crate::verification::FrameReport;

/// Длина осей позы в метрах.
pub const AXIS_LENGTH_M: f32 = 0.15;

/// Копия кадра с маркерами, углами charuco и осями позы, если она найдена.
pub fn draw_overlay(
    image: &Mat,
    detection: &DetectionResult,
    pose: &PoseEstimate,
    intrinsics: Option<&Intrinsics>,
) -> Result<Mat> {
    let mut out = image.clone();
    if out.channels() == 1 {
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&out, &mut bgr, imgproc::COLOR_GRAY2BGR)?;
        out = bgr;
    }
    if !detection.marker_ids.is_empty() {
        draw_detected_markers(
            &mut out,
            &detection.marker_corners,
            &detection.marker_ids,
            Scalar::new(255.0, 0.0, 0.0, 255.0),
        )?;
    }
    if !detection.charuco_ids.is_empty() {
        draw_detected_corners_charuco(
            &mut out,
            &detection.charuco_corners,
            &detection.charuco_ids,
            Scalar::new(0.0, 255.0, 0.0, 255.0),
        )?;
    }
    if let (true, Some(intrinsics)) = (pose.ok, intrinsics) {
        // X красная, Y зелёная, Z синяя
        calib3d::draw_frame_axes_def(
            &mut out,
            &intrinsics.camera_matrix_mat()?,
            &intrinsics.distortion_mat()?,
            &Mat::from_slice(&pose.rvec)?.try_clone()?,
            &Mat::from_slice(&pose.tvec)?.try_clone()?,
            AXIS_LENGTH_M,
        )?;
    }
    Ok(out)
}

/// Строка состояния в левом верхнем углу: чёрная обводка под белым текстом.
pub fn draw_status(image: &mut Mat, report: &FrameReport) -> Result<()> {
    let mut text = format!(
        "markers={}  charuco={}  ",
        report.marker_count, report.charuco_count
    );
    if let Some(err) = report.pose.reproj_error_px {
        text.push_str(&format!("err={:.2}px  ", err));
    }
    text.push_str(if report.pose.ok { "pose=OK" } else { "pose=..." });
    for (color, thickness) in [(Scalar::all(0.0), 3), (Scalar::all(255.0), 1)] {
        imgproc::put_text(
            image,
            &text,
            Point::new(12, 28),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.7,
            color,
            thickness,
            imgproc::LINE_AA,
            false,
        )?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAction {
    Continue,
    Save,
    Quit,
}

impl SinkAction {
    /// `q` или Esc завершают просмотр, `s` сохраняет текущий кадр.
    pub fn from_key(key: i32) -> Self {
        match key & 0xFF {
            27 => SinkAction::Quit,
            k if k == 'q' as i32 => SinkAction::Quit,
            k if k == 's' as i32 => SinkAction::Save,
            _ => SinkAction::Continue,
        }
    }
}

/// Куда уходят кадры с разметкой: окно и/или папка.
pub struct OverlaySink {
    window: Option<String>,
    save_dir: Option<PathBuf>,
    saved: usize,
}

impl OverlaySink {
    pub fn new(window: Option<&str>, save_dir: Option<PathBuf>) -> Self {
        Self {
            window: window.map(str::to_string),
            save_dir,
            saved: 0,
        }
    }

    pub fn saves(&self) -> bool {
        self.save_dir.is_some()
    }

    /// Сохраняет кадр под именем исходного файла. Без папки ничего не делает.
    pub fn save(&self, name: &str, overlay: &Mat) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.save_dir else {
            return Ok(None);
        };
        create_dir_all(dir)?;
        let path = dir.join(name);
        imgcodecs::imwrite(&path.to_string_lossy(), overlay, &Vector::new())?;
        info!("Сохранено {}", path.display());
        Ok(Some(path))
    }

    /// Сохраняет кадр как `{prefix}_NNNN.png`, номера идут подряд по сохранённым кадрам.
    pub fn save_numbered(&mut self, prefix: &str, overlay: &Mat) -> Result<Option<PathBuf>> {
        let name = format!("{}_{:04}.png", prefix, self.saved);
        let path = self.save(&name, overlay)?;
        if path.is_some() {
            self.saved += 1;
        }
        Ok(path)
    }

    /// Показывает кадр и ждёт клавишу `wait_ms` миллисекунд (0 означает без ограничения).
    pub fn show(&self, overlay: &Mat, wait_ms: i32) -> Result<SinkAction> {
        let Some(window) = &self.window else {
            return Ok(SinkAction::Continue);
        };
        highgui::named_window(window, highgui::WINDOW_NORMAL)?;
        highgui::imshow(window, overlay)?;
        Ok(SinkAction::from_key(highgui::wait_key(wait_ms)?))
    }

    pub fn close(&self) -> Result<()> {
        if self.window.is_some() {
            highgui::destroy_all_windows()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC1, CV_8UC3};

    use super::*;

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(SinkAction::from_key(27), SinkAction::Quit);
        assert_eq!(SinkAction::from_key('q' as i32), SinkAction::Quit);
        assert_eq!(SinkAction::from_key('s' as i32), SinkAction::Save);
        assert_eq!(SinkAction::from_key(-1), SinkAction::Continue);
    }

    #[test]
    fn overlay_of_empty_detection_is_color_copy() {
        let gray = Mat::new_rows_cols_with_default(48, 64, CV_8UC1, Scalar::all(200.0)).unwrap();
        let out = draw_overlay(
            &gray,
            &DetectionResult::default(),
            &PoseEstimate::failed(),
            None,
        )
        .unwrap();
        assert_eq!(out.typ(), CV_8UC3);
        assert_eq!(out.size().unwrap(), gray.size().unwrap());
    }

    #[test]
    fn save_writes_under_source_name() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OverlaySink::new(None, Some(dir.path().join("out")));
        let image = Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::all(0.0)).unwrap();
        let path = sink.save("frame_001.png", &image).unwrap().unwrap();
        assert!(path.ends_with("out/frame_001.png"));
        assert!(path.exists());
        assert!(OverlaySink::new(None, None).save("x.png", &image).unwrap().is_none());
    }

    #[test]
    fn numbered_saves_have_no_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = OverlaySink::new(None, Some(dir.path().to_path_buf()));
        let image = Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::all(0.0)).unwrap();
        let first = sink.save_numbered("webcam", &image).unwrap().unwrap();
        let second = sink.save_numbered("webcam", &image).unwrap().unwrap();
        assert!(first.ends_with("webcam_0000.png"));
        assert!(second.ends_with("webcam_0001.png"));
    }
}
