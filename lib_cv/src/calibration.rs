use std::path::PathBuf;

use log::{debug, info, warn};
use opencv::calib3d::{CALIB_FIX_K3, CALIB_RATIONAL_MODEL, calibrate_camera};
use opencv::core::{Mat, Point2f, Size, TermCriteria, Vector};
use opencv::prelude::*;

use crate::board::{Board, BoardSpec};
use crate::config::DetectionConfig;
use crate::detection::DetectionResult;
use crate::dictionary::select_corpus_dictionary;
use crate::error::{Error, Result};
use crate::pose::reprojection_error;
use crate::source::{read_image, to_gray};

/// Рациональная модель дисторсии с зафиксированным k3: 8 коэффициентов.
pub const CALIBRATION_FLAGS: i32 = CALIB_RATIONAL_MODEL | CALIB_FIX_K3;

/// Внутренние параметры камеры.
#[derive(Debug, Clone, PartialEq)]
pub struct Intrinsics {
    pub camera_matrix: [[f64; 3]; 3], // row-major
    pub distortion: Vec<f64>,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            camera_matrix: [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
            distortion: Vec::new(),
        }
    }

    pub fn from_mats(camera_matrix: &Mat, distortion: &Mat) -> Result<Self> {
        let mut k = [[0.0; 3]; 3];
        for (r, row) in k.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = *camera_matrix.at_2d::<f64>(r as i32, c as i32)?;
            }
        }
        let distortion = if distortion.empty() {
            Vec::new()
        } else {
            distortion.data_typed::<f64>()?.to_vec()
        };
        Ok(Self {
            camera_matrix: k,
            distortion,
        })
    }

    pub fn camera_matrix_mat(&self) -> Result<Mat> {
        Ok(Mat::from_slice_2d(&self.camera_matrix)?)
    }

    /// Пустой набор коэффициентов OpenCV трактует как отсутствие дисторсии.
    pub fn distortion_mat(&self) -> Result<Mat> {
        if self.distortion.is_empty() {
            return Ok(Mat::default());
        }
        Ok(Mat::from_slice(&self.distortion)?.try_clone()?)
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[1][1]
    }
}

/// Углы charuco одного изображения, пригодного для калибровки.
#[derive(Debug, Clone)]
pub struct CharucoView {
    pub corners: Vector<Point2f>,
    pub ids: Vector<i32>,
}

impl From<DetectionResult> for CharucoView {
    fn from(detection: DetectionResult) -> Self {
        Self {
            corners: detection.charuco_corners,
            ids: detection.charuco_ids,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationResult {
    pub intrinsics: Intrinsics,
    pub board: BoardSpec,
    pub image_size: (i32, i32),
    /// Среднеквадратичная ошибка репроекции по всем соответствиям, как её вернул решатель.
    pub mean_reproj_error_px: f64,
    /// По одному значению на каждый вид, вошедший в решение.
    pub per_view_errors_px: Vec<f64>,
    pub frames_used: usize,
}

impl CalibrationResult {
    pub fn dictionary_id(&self) -> i32 {
        self.board.dictionary_id
    }

    pub fn frames_used(&self) -> usize {
        self.frames_used
    }
}

/// Калибровка по уже найденным углам. Без единого вида решатель не вызывается.
pub fn calibrate(
    views: &[CharucoView],
    board: &Board,
    image_size: Size,
) -> Result<CalibrationResult> {
    let mut all_object_points = Vector::<Mat>::new();
    let mut all_image_points = Vector::<Mat>::new();
    let mut used_views = Vec::with_capacity(views.len());

    for view in views {
        if view.corners.is_empty() || view.corners.len() != view.ids.len() {
            continue;
        }
        let Some(object_points) = board.geometry().select(&view.ids) else {
            warn!("Вид с id углов вне доски пропущен");
            continue;
        };
        let mut obj_points = Mat::default();
        let mut img_points = Mat::default();
        board.charuco().match_image_points(
            &view.corners,
            &view.ids,
            &mut obj_points,
            &mut img_points,
        )?;
        if obj_points.empty() || img_points.empty() {
            continue;
        }
        all_object_points.push(obj_points);
        all_image_points.push(img_points);
        used_views.push((view, object_points));
    }

    if used_views.is_empty() {
        return Err(Error::InsufficientCalibrationData);
    }

    let mut camera_matrix = Mat::default();
    let mut dist_coeffs = Mat::default();
    let mut r_vecs = Vector::<Mat>::new();
    let mut t_vecs = Vector::<Mat>::new();

    let criteria = TermCriteria::new(
        opencv::core::TermCriteria_COUNT + opencv::core::TermCriteria_EPS,
        30,
        f64::EPSILON,
    )?;

    let rms = calibrate_camera(
        &all_object_points,
        &all_image_points,
        image_size,
        &mut camera_matrix,
        &mut dist_coeffs,
        &mut r_vecs,
        &mut t_vecs,
        CALIBRATION_FLAGS,
        criteria,
    )?;

    let intrinsics = Intrinsics::from_mats(&camera_matrix, &dist_coeffs)?;

    let mut per_view_errors_px = Vec::with_capacity(used_views.len());
    for (i, (view, object_points)) in used_views.iter().enumerate() {
        let rvec = vec3(&r_vecs.get(i)?)?;
        let tvec = vec3(&t_vecs.get(i)?)?;
        let err = reprojection_error(object_points, &view.corners, &rvec, &tvec, &intrinsics)?;
        debug!("Вид {}: {} углов, ошибка {:.3} px", i, view.ids.len(), err);
        per_view_errors_px.push(err);
    }

    info!(
        "Калибровка по {} изображениям: ошибка репроекции {:.4} px",
        used_views.len(),
        rms
    );

    Ok(CalibrationResult {
        intrinsics,
        board: *board.spec(),
        image_size: (image_size.width, image_size.height),
        mean_reproj_error_px: rms,
        per_view_errors_px,
        frames_used: used_views.len(),
    })
}

/// Полный прогон калибровки по списку файлов: чтение, выбор словаря голосованием,
/// сбор углов и решение.
pub fn calibrate_corpus(
    paths: &[PathBuf],
    spec: &BoardSpec,
    config: &DetectionConfig,
) -> Result<CalibrationResult> {
    if paths.is_empty() {
        return Err(Error::NoInput("список изображений пуст".to_string()));
    }

    let mut images = Vec::with_capacity(paths.len());
    let mut image_size: Option<Size> = None;
    for path in paths {
        let image = match read_image(path) {
            Ok(image) => image,
            Err(Error::UnreadableImage(p)) => {
                warn!("Не получилось прочитать {}", p.display());
                continue;
            }
            Err(e) => return Err(e),
        };
        let size = image.size()?;
        match image_size {
            None => image_size = Some(size),
            Some(expected) if expected != size => {
                warn!(
                    "{}: размер {}x{} отличается от {}x{}, пропускаю",
                    path.display(),
                    size.width,
                    size.height,
                    expected.width,
                    expected.height
                );
                continue;
            }
            Some(_) => {}
        }
        images.push(to_gray(&image)?);
    }

    let Some(image_size) = image_size else {
        return Err(Error::NoInput("ни одно изображение не прочитано".to_string()));
    };

    let selection = select_corpus_dictionary(&images, spec, config)?
        .ok_or(Error::InsufficientCalibrationData)?;

    let views: Vec<CharucoView> = selection
        .detections
        .into_iter()
        .flatten()
        .map(CharucoView::from)
        .collect();

    calibrate(&views, &selection.board, image_size)
}

pub(crate) fn vec3(m: &Mat) -> Result<[f64; 3]> {
    Ok([*m.at::<f64>(0)?, *m.at::<f64>(1)?, *m.at::<f64>(2)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::make_board;

    #[test]
    fn no_views_is_insufficient_data() {
        let board = make_board(&BoardSpec::default()).unwrap();
        let result = calibrate(&[], &board, Size::new(640, 480));
        assert!(matches!(result, Err(Error::InsufficientCalibrationData)));
    }

    #[test]
    fn empty_views_are_ignored() {
        let board = make_board(&BoardSpec::default()).unwrap();
        let views = vec![CharucoView {
            corners: Vector::new(),
            ids: Vector::new(),
        }];
        let result = calibrate(&views, &board, Size::new(640, 480));
        assert!(matches!(result, Err(Error::InsufficientCalibrationData)));
    }

    fn projected_view(board: &Board, rvec: [f64; 3], tvec: [f64; 3]) -> CharucoView {
        let ids: Vector<i32> = (0..board.geometry().len() as i32).collect();
        let object_points = board.geometry().select(&ids).unwrap();
        let camera = Intrinsics::new(1000.0, 1000.0, 640.0, 480.0);
        let mut corners = Vector::<Point2f>::new();
        opencv::calib3d::project_points_def(
            &object_points,
            &Mat::from_slice(&rvec).unwrap().try_clone().unwrap(),
            &Mat::from_slice(&tvec).unwrap().try_clone().unwrap(),
            &camera.camera_matrix_mat().unwrap(),
            &Mat::default(),
            &mut corners,
        )
        .unwrap();
        CharucoView { corners, ids }
    }

    #[test]
    fn skipped_views_are_not_counted() {
        let board = make_board(&BoardSpec::default()).unwrap();
        let mut views = vec![
            projected_view(&board, [0.0, 0.0, 0.0], [-0.4, -0.275, 1.0]),
            projected_view(&board, [0.3, 0.0, 0.0], [-0.4, -0.3, 1.1]),
            projected_view(&board, [0.0, 0.35, 0.0], [-0.35, -0.275, 1.1]),
            projected_view(&board, [-0.25, -0.3, 0.1], [-0.45, -0.25, 1.2]),
        ];
        let mut foreign = views[0].clone();
        foreign.ids.set(0, 9999).unwrap();
        views.push(foreign);
        views.push(CharucoView {
            corners: Vector::new(),
            ids: Vector::new(),
        });

        let result = calibrate(&views, &board, Size::new(1280, 960)).unwrap();
        assert_eq!(result.frames_used(), 4);
        assert_eq!(result.per_view_errors_px.len(), 4);
        assert!(result.per_view_errors_px.iter().all(|e| *e < 0.1));
    }

    #[test]
    fn empty_corpus_is_no_input() {
        let result = calibrate_corpus(&[], &BoardSpec::default(), &DetectionConfig::default());
        assert!(matches!(result, Err(Error::NoInput(_))));
    }

    #[test]
    fn unreadable_corpus_is_no_input() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"garbage").unwrap();
        let result = calibrate_corpus(&[bad], &BoardSpec::default(), &DetectionConfig::default());
        assert!(matches!(result, Err(Error::NoInput(_))));
    }

    #[test]
    fn intrinsics_survive_mat_conversion() {
        let mut intrinsics = Intrinsics::new(900.0, 905.0, 640.0, 480.0);
        intrinsics.distortion = vec![0.1, -0.02, 0.001, 0.0005, 0.0, 0.01, 0.0, 0.0];
        let k = intrinsics.camera_matrix_mat().unwrap();
        let d = intrinsics.distortion_mat().unwrap();
        assert_eq!(Intrinsics::from_mats(&k, &d).unwrap(), intrinsics);
    }
}
