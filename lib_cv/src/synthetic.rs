//! Синтетические снимки доски через идеальную камеру-обскуру с известной позой.

use opencv::core::{BORDER_CONSTANT, Mat, Scalar, Size, gemm};
use opencv::prelude::*;
use opencv::{calib3d, imgproc};

use crate::board::Board;
use crate::calibration::Intrinsics;
use crate::error::Result;

/// Пикселей на клетку в исходном изображении доски перед проецированием.
const PX_PER_SQUARE: i32 = 60;
const MARGIN_PX: i32 = 0;

/// Поза доски: координаты доски переводятся в координаты камеры как `R(rvec) * X + tvec`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardPose {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl BoardPose {
    /// Доска повёрнута на `rvec` вокруг своего центра, центр на оси камеры на расстоянии `distance_m`.
    pub fn centered(board: &Board, rvec: [f64; 3], distance_m: f64) -> Result<Self> {
        let spec = board.spec();
        let center = [
            spec.squares_x as f64 * spec.square_length_m as f64 / 2.0,
            spec.squares_y as f64 * spec.square_length_m as f64 / 2.0,
            0.0,
        ];
        let r = rotation_matrix(&rvec)?;
        let mut tvec = [0.0, 0.0, distance_m];
        for (i, t) in tvec.iter_mut().enumerate() {
            *t -= (0..3).map(|j| r[i][j] * center[j]).sum::<f64>();
        }
        Ok(Self { rvec, tvec })
    }
}

fn rotation_matrix(rvec: &[f64; 3]) -> Result<[[f64; 3]; 3]> {
    let mut r = Mat::default();
    calib3d::rodrigues_def(&Mat::from_slice(rvec)?.try_clone()?, &mut r)?;
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = *r.at_2d::<f64>(i as i32, j as i32)?;
        }
    }
    Ok(out)
}

/// Гомография из пикселей изображения доски в пиксели камеры: `K [r1 r2 t] S`,
/// где `S` переводит пиксели доски в метры.
fn board_to_camera_homography(
    board: &Board,
    intrinsics: &Intrinsics,
    pose: &BoardPose,
) -> Result<Mat> {
    let r = rotation_matrix(&pose.rvec)?;
    let extrinsic = [
        [r[0][0], r[0][1], pose.tvec[0]],
        [r[1][0], r[1][1], pose.tvec[1]],
        [r[2][0], r[2][1], pose.tvec[2]],
    ];
    let s = board.spec().square_length_m as f64 / PX_PER_SQUARE as f64;
    let offset = -(MARGIN_PX as f64) * s;
    let scale = [[s, 0.0, offset], [0.0, s, offset], [0.0, 0.0, 1.0]];

    let mut k_rt = Mat::default();
    gemm(
        &intrinsics.camera_matrix_mat()?,
        &Mat::from_slice_2d(&extrinsic)?,
        1.0,
        &Mat::default(),
        0.0,
        &mut k_rt,
        0,
    )?;
    let mut h = Mat::default();
    gemm(&k_rt, &Mat::from_slice_2d(&scale)?, 1.0, &Mat::default(), 0.0, &mut h, 0)?;
    Ok(h)
}

/// Снимок доски камерой без дисторсии. Фон белый, изображение в оттенках серого.
pub fn render_view(
    board: &Board,
    intrinsics: &Intrinsics,
    image_size: Size,
    pose: &BoardPose,
) -> Result<Mat> {
    let pattern = board.render(PX_PER_SQUARE, MARGIN_PX)?;
    let h = board_to_camera_homography(board, intrinsics, pose)?;
    let mut view = Mat::default();
    imgproc::warp_perspective(
        &pattern,
        &mut view,
        &h,
        image_size,
        imgproc::INTER_LINEAR,
        BORDER_CONSTANT,
        Scalar::all(255.0),
    )?;
    Ok(view)
}

/// Набор поз для калибровки: наклоны в разные стороны на разных расстояниях.
pub fn calibration_poses(board: &Board) -> Result<Vec<BoardPose>> {
    [
        ([0.0, 0.0, 0.0], 0.95),
        ([0.35, 0.0, 0.0], 1.0),
        ([-0.35, 0.0, 0.05], 1.0),
        ([0.0, 0.4, 0.0], 1.05),
        ([0.0, -0.4, -0.05], 1.05),
        ([0.25, 0.3, 0.1], 1.1),
        ([-0.25, -0.3, 0.0], 1.1),
    ]
    .into_iter()
    .map(|(rvec, distance)| BoardPose::centered(board, rvec, distance))
    .collect()
}
