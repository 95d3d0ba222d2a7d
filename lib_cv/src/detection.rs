use log::debug;
use opencv::core::{Point2f, Point3f, Vector};
use opencv::objdetect::{
    ArucoDetector, CharucoDetector, CharucoParameters, DetectorParameters, RefineParameters,
};
use opencv::prelude::*;

use crate::board::Board;
use crate::config::DetectionConfig;
use crate::error::Result;

/// Результат детекции доски на одном кадре.
///
/// Если `success == false`, поля можно читать, но их содержимое ничего не гарантирует.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub dictionary_used: Option<i32>,
    pub marker_corners: Vector<Vector<Point2f>>,
    pub marker_ids: Vector<i32>,
    pub charuco_corners: Vector<Point2f>,
    pub charuco_ids: Vector<i32>,
    pub success: bool,
}

impl DetectionResult {
    pub fn marker_count(&self) -> usize {
        self.marker_ids.len()
    }

    pub fn charuco_count(&self) -> usize {
        self.charuco_ids.len()
    }

    /// 3D точки доски для найденных углов, в порядке `charuco_ids`.
    pub fn object_points(&self, board: &Board) -> Option<Vector<Point3f>> {
        board.geometry().select(&self.charuco_ids)
    }
}

fn refine_parameters() -> RefineParameters {
    RefineParameters {
        min_rep_distance: 10.0,
        error_correction_rate: 3.0,
        check_all_orders: true,
    }
}

/// Детекция доски: маркеры словаря доски, затем интерполяция углов charuco между ними.
///
/// Успех только если интерполяция вернула углы и их не меньше `config.min_charuco`.
pub fn detect(gray: &Mat, board: &Board, config: &DetectionConfig) -> Result<DetectionResult> {
    let mut result = DetectionResult {
        dictionary_used: Some(board.spec().dictionary_id),
        ..Default::default()
    };

    let marker_detector = ArucoDetector::new(
        board.dictionary(),
        &DetectorParameters::default()?,
        refine_parameters(),
    )?;
    let mut rejected = Vector::<Vector<Point2f>>::new();
    marker_detector.detect_markers(
        gray,
        &mut result.marker_corners,
        &mut result.marker_ids,
        &mut rejected,
    )?;

    // маркеры у краёв кадра и при перекрытии часто ложные, поэтому отсекаем по количеству
    if result.marker_ids.is_empty() || result.marker_ids.len() < config.min_markers {
        debug!(
            "Словарь {}: найдено {} маркеров, требуется {}",
            board.spec().dictionary_id,
            result.marker_ids.len(),
            config.min_markers
        );
        return Ok(result);
    }

    // переданные маркеры не ищутся повторно, детектор только интерполирует углы
    let charuco_detector = CharucoDetector::new(
        board.charuco(),
        &CharucoParameters::default()?,
        &DetectorParameters::default()?,
        refine_parameters(),
    )?;
    charuco_detector.detect_board(
        gray,
        &mut result.charuco_corners,
        &mut result.charuco_ids,
        &mut result.marker_corners,
        &mut result.marker_ids,
    )?;

    result.success =
        !result.charuco_ids.is_empty() && result.charuco_ids.len() >= config.min_charuco;
    debug!(
        "Словарь {}: маркеров {}, углов charuco {}, успех: {}",
        board.spec().dictionary_id,
        result.marker_ids.len(),
        result.charuco_ids.len(),
        result.success
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use opencv::core::{CV_8UC1, Scalar};

    use super::*;
    use crate::board::{BoardSpec, make_board};

    #[test]
    fn blank_image_yields_no_detection() {
        let board = make_board(&BoardSpec::default()).unwrap();
        let blank =
            Mat::new_rows_cols_with_default(480, 640, CV_8UC1, Scalar::all(255.0)).unwrap();
        let result = detect(&blank, &board, &DetectionConfig::default()).unwrap();
        assert!(!result.success);
        // поля читаются без паники, значения не важны
        let _ = result.charuco_count();
        let _ = result.marker_count();
        let _ = result.charuco_corners.len();
    }

    #[test]
    fn flat_rendered_board_is_detected() {
        let board = make_board(&BoardSpec::default()).unwrap();
        let image = board.render(60, 40).unwrap();
        let result = detect(&image, &board, &DetectionConfig::default()).unwrap();
        assert!(result.success);
        assert_eq!(result.dictionary_used, Some(board.spec().dictionary_id));
        assert!(result.charuco_count() >= 100, "{}", result.charuco_count());
        assert_eq!(result.charuco_corners.len(), result.charuco_ids.len());

        let unique: HashSet<i32> = result.charuco_ids.iter().collect();
        assert_eq!(unique.len(), result.charuco_count());
        assert!(unique.iter().all(|&id| id >= 0 && (id as usize) < board.geometry().len()));
        assert!(result.object_points(&board).is_some());
    }

    #[test]
    fn corner_gate_rejects_small_counts() {
        let board = make_board(&BoardSpec::default()).unwrap();
        let image = board.render(60, 40).unwrap();
        let config = DetectionConfig {
            min_charuco: 1000,
            ..Default::default()
        };
        let result = detect(&image, &board, &config).unwrap();
        assert!(!result.success);
        assert!(result.charuco_count() > 0);
    }
}
