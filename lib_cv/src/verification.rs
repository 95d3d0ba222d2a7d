use std::fmt;

use log::debug;
use opencv::core::Mat;

use crate::board::Board;
use crate::calibration::Intrinsics;
use crate::config::{DetectionConfig, Thresholds};
use crate::detection::DetectionResult;
use crate::dictionary::resolve;
use crate::error::{Error, Result};
use crate::pose::{PoseEstimate, solve_pose};

/// Почему кадр не прошёл проверку.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFailure {
    NoDetection,
    MissingIntrinsics,
    PoseSolveFailure,
    Thresholds,
}

impl FrameFailure {
    pub fn as_error(&self) -> Option<Error> {
        match self {
            FrameFailure::NoDetection => Some(Error::NoDetection),
            FrameFailure::PoseSolveFailure => Some(Error::PoseSolveFailure),
            FrameFailure::MissingIntrinsics | FrameFailure::Thresholds => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameReport {
    pub name: String,
    pub dictionary_used: Option<i32>,
    pub marker_count: usize,
    pub charuco_count: usize,
    pub pose: PoseEstimate,
    pub passed: bool,
    pub failure: Option<FrameFailure>,
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dict = self
            .dictionary_used
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} | dict={} | markers={}, charuco={} | pose={}",
            self.name,
            dict,
            self.marker_count,
            self.charuco_count,
            if self.pose.ok { "OK" } else { "FAIL" }
        )?;
        if let Some(err) = self.pose.reproj_error_px {
            write!(f, ", reproj_err={:.3}px", err)?;
        }
        Ok(())
    }
}

/// Результат проверки одного кадра вместе с доской, на которой он был найден.
pub struct FrameEvaluation<'a> {
    pub detection: DetectionResult,
    pub board: Option<&'a Board>,
    pub report: FrameReport,
}

/// Полная проверка кадра: поиск доски среди `boards`, поза, ошибка репроекции и решение
/// по порогам.
///
/// `config` отвечает только за то, считается ли доска найденной. Порог углов для
/// прохождения проверки задаёт `thresholds`, поэтому гейт детекции должен быть не строже.
pub fn evaluate_frame<'a>(
    name: &str,
    gray: &Mat,
    boards: &'a [Board],
    config: &DetectionConfig,
    intrinsics: Option<&Intrinsics>,
    thresholds: &Thresholds,
) -> Result<FrameEvaluation<'a>> {
    let Some(resolution) = resolve(gray, boards, config)? else {
        debug!("{}: доска не найдена", name);
        return Ok(FrameEvaluation {
            detection: DetectionResult::default(),
            board: None,
            report: FrameReport {
                name: name.to_string(),
                dictionary_used: None,
                marker_count: 0,
                charuco_count: 0,
                pose: PoseEstimate::failed(),
                passed: false,
                failure: Some(FrameFailure::NoDetection),
            },
        });
    };

    let dictionary_id = resolution.dictionary_id();
    let detection = resolution.detection;
    let pose = solve_pose(&detection, resolution.board, intrinsics)?;
    let charuco_count = detection.charuco_count();
    let passed = thresholds.passes(
        charuco_count,
        pose.ok,
        pose.reproj_error_px.unwrap_or(f64::INFINITY),
    );
    let failure = if passed {
        None
    } else if intrinsics.is_none() {
        Some(FrameFailure::MissingIntrinsics)
    } else if !pose.ok {
        Some(FrameFailure::PoseSolveFailure)
    } else {
        Some(FrameFailure::Thresholds)
    };

    let report = FrameReport {
        name: name.to_string(),
        dictionary_used: Some(dictionary_id),
        marker_count: detection.marker_count(),
        charuco_count,
        pose,
        passed,
        failure,
    };
    Ok(FrameEvaluation {
        detection,
        board: Some(resolution.board),
        report,
    })
}

/// Итог по всем кадрам.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub total: usize,
}

impl Tally {
    pub fn record(&mut self, report: &FrameReport) {
        self.total += 1;
        if report.passed {
            self.passed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC1, Scalar, Size};
    use opencv::prelude::*;

    use super::*;
    use crate::board::{BoardSpec, make_board};
    use crate::config::PipelineConfig;
    use crate::dictionary::candidate_boards;
    use crate::synthetic::{BoardPose, render_view};

    fn boards(spec: &BoardSpec) -> Vec<Board> {
        candidate_boards(spec, &DetectionConfig::default().candidates).unwrap()
    }

    #[test]
    fn blank_frame_is_recorded_as_failure() {
        let blank =
            Mat::new_rows_cols_with_default(480, 640, CV_8UC1, Scalar::all(255.0)).unwrap();
        let boards = boards(&BoardSpec::default());
        let evaluation = evaluate_frame(
            "blank.png",
            &blank,
            &boards,
            &DetectionConfig::default(),
            None,
            &Thresholds::default(),
        )
        .unwrap();
        assert!(!evaluation.report.passed);
        assert_eq!(evaluation.report.failure, Some(FrameFailure::NoDetection));
        assert!(matches!(
            evaluation.report.failure.and_then(|f| f.as_error()),
            Some(Error::NoDetection)
        ));
        assert!(evaluation.board.is_none());
    }

    #[test]
    fn detection_without_intrinsics_fails_verdict() {
        let spec = BoardSpec::default();
        let image = make_board(&spec).unwrap().render(60, 40).unwrap();
        let boards = boards(&spec);
        let evaluation = evaluate_frame(
            "flat.png",
            &image,
            &boards,
            &DetectionConfig::default(),
            None,
            &Thresholds::default(),
        )
        .unwrap();
        assert!(evaluation.detection.success);
        assert!(!evaluation.report.pose.ok);
        assert_eq!(
            evaluation.report.failure,
            Some(FrameFailure::MissingIntrinsics)
        );
        assert!(evaluation.report.to_string().contains("pose=FAIL"));
    }

    #[test]
    fn lowered_corner_threshold_passes_small_board() {
        // 5x4 клетки: 12 углов, меньше порога детекции для калибровки
        let spec = BoardSpec {
            squares_x: 5,
            squares_y: 4,
            ..BoardSpec::default()
        };
        let boards = boards(&spec);
        let camera = Intrinsics::new(1000.0, 1000.0, 640.0, 480.0);
        let pose = BoardPose::centered(&boards[0], [0.1, -0.1, 0.0], 0.6).unwrap();
        let image = render_view(&boards[0], &camera, Size::new(1280, 960), &pose).unwrap();
        let thresholds = Thresholds {
            min_charuco: 10,
            ..Thresholds::default()
        };

        let strict = evaluate_frame(
            "small.png",
            &image,
            &boards,
            &DetectionConfig::default(),
            Some(&camera),
            &thresholds,
        )
        .unwrap();
        assert_eq!(strict.report.failure, Some(FrameFailure::NoDetection));

        let config = PipelineConfig {
            thresholds,
            ..PipelineConfig::verification()
        };
        let evaluation = evaluate_frame(
            "small.png",
            &image,
            &boards,
            &config.verification_detection(),
            Some(&camera),
            &thresholds,
        )
        .unwrap();
        let report = &evaluation.report;
        assert!(report.charuco_count >= 10 && report.charuco_count <= 12);
        assert!(report.pose.ok);
        assert!(report.passed, "{}", report);
        assert_eq!(report.failure, None);
    }

    #[test]
    fn tally_counts_passes() {
        let mut tally = Tally::default();
        let mut report = FrameReport {
            name: "a".into(),
            dictionary_used: None,
            marker_count: 0,
            charuco_count: 0,
            pose: PoseEstimate::failed(),
            passed: true,
            failure: None,
        };
        tally.record(&report);
        report.passed = false;
        tally.record(&report);
        assert_eq!(tally, Tally { passed: 1, total: 2 });
    }
}
