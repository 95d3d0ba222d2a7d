use log::debug;
use opencv::calib3d::{self, SOLVEPNP_ITERATIVE};
use opencv::core::{Mat, Point2f, Point3f, Vector};
use opencv::prelude::*;

use crate::board::Board;
use crate::calibration::{Intrinsics, vec3};
use crate::detection::DetectionResult;
use crate::error::{Error, Result};

/// Поза доски относительно камеры на одном кадре.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseEstimate {
    pub rvec: [f64; 3], // axis-angle
    pub tvec: [f64; 3], // meters
    /// Средняя ошибка репроекции в пикселях. `None`, если поза не найдена.
    pub reproj_error_px: Option<f64>,
    pub ok: bool,
}

impl PoseEstimate {
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Средняя евклидова ошибка между наблюдёнными точками и проекцией точек доски.
/// Для пустого набора возвращает 0, при разном числе точек `Error::PointCountMismatch`.
pub fn reprojection_error(
    object_points: &Vector<Point3f>,
    observed: &Vector<Point2f>,
    rvec: &[f64; 3],
    tvec: &[f64; 3],
    intrinsics: &Intrinsics,
) -> Result<f64> {
    if object_points.len() != observed.len() {
        return Err(Error::PointCountMismatch {
            object: object_points.len(),
            observed: observed.len(),
        });
    }
    if object_points.is_empty() {
        return Ok(0.0);
    }
    let rvec = Mat::from_slice(rvec)?.try_clone()?;
    let tvec = Mat::from_slice(tvec)?.try_clone()?;
    let mut projected = Vector::<Point2f>::new();
    calib3d::project_points_def(
        object_points,
        &rvec,
        &tvec,
        &intrinsics.camera_matrix_mat()?,
        &intrinsics.distortion_mat()?,
        &mut projected,
    )?;

    let total: f64 = projected
        .iter()
        .zip(observed.iter())
        .map(|(p, o)| (p.x as f64 - o.x as f64).hypot(p.y as f64 - o.y as f64))
        .sum();
    Ok(total / projected.len() as f64)
}

/// Поза доски по найденным углам charuco.
///
/// `ok == false`, если детекция неуспешна, параметров камеры нет, углов меньше четырёх
/// или PnP не сошёлся. Ошибка репроекции пересчитывается заново по найденной позе,
/// а не берётся из решателя.
pub fn solve_pose(
    detection: &DetectionResult,
    board: &Board,
    intrinsics: Option<&Intrinsics>,
) -> Result<PoseEstimate> {
    if !detection.success {
        return Ok(PoseEstimate::failed());
    }
    let Some(intrinsics) = intrinsics else {
        return Ok(PoseEstimate::failed());
    };
    let Some(object_points) = detection.object_points(board) else {
        debug!("id углов вне геометрии доски");
        return Ok(PoseEstimate::failed());
    };
    if object_points.len() < 4 || object_points.len() != detection.charuco_corners.len() {
        return Ok(PoseEstimate::failed());
    }

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    let solved = match calib3d::solve_pnp(
        &object_points,
        &detection.charuco_corners,
        &intrinsics.camera_matrix_mat()?,
        &intrinsics.distortion_mat()?,
        &mut rvec,
        &mut tvec,
        false,
        SOLVEPNP_ITERATIVE,
    ) {
        Ok(solved) => solved,
        Err(e) => {
            debug!("solvePnP: {}", e);
            false
        }
    };
    if !solved {
        return Ok(PoseEstimate::failed());
    }

    let rvec = vec3(&rvec)?;
    let tvec = vec3(&tvec)?;
    if rvec.iter().chain(tvec.iter()).any(|v| !v.is_finite()) {
        return Ok(PoseEstimate::failed());
    }

    let err = reprojection_error(
        &object_points,
        &detection.charuco_corners,
        &rvec,
        &tvec,
        intrinsics,
    )?;
    Ok(PoseEstimate {
        rvec,
        tvec,
        reproj_error_px: Some(err),
        ok: true,
    })
}
