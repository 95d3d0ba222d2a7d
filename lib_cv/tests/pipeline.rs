use approx::assert_relative_eq;
use lib_cv::board::{BoardSpec, DICT_7X7_1000, make_board};
use lib_cv::calibration::{CharucoView, Intrinsics, calibrate, calibrate_corpus};
use lib_cv::config::{DetectionConfig, Thresholds};
use lib_cv::detection::detect;
use lib_cv::dictionary::candidate_boards;
use lib_cv::record::CalibrationRecord;
use lib_cv::source::list_images;
use lib_cv::synthetic::{BoardPose, calibration_poses, render_view};
use lib_cv::verification::evaluate_frame;
use lib_cv::Error;
use opencv::core::{Size, Vector};
use opencv::imgcodecs;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn truth() -> Intrinsics {
    Intrinsics::new(1000.0, 1000.0, 640.0, 480.0)
}

fn image_size() -> Size {
    Size::new(1280, 960)
}

#[test]
fn synthetic_views_calibrate_and_verify() {
    init_logger();
    let spec = BoardSpec::default();
    let board = make_board(&spec).unwrap();

    let views: Vec<CharucoView> = calibration_poses(&board)
        .unwrap()
        .iter()
        .map(|pose| {
            let image = render_view(&board, &truth(), image_size(), pose).unwrap();
            let detection = detect(&image, &board, &DetectionConfig::default()).unwrap();
            assert!(detection.success, "pose {:?} not detected", pose);
            CharucoView::from(detection)
        })
        .collect();

    let result = calibrate(&views, &board, image_size()).unwrap();
    assert_relative_eq!(result.intrinsics.fx(), truth().fx(), max_relative = 0.05);
    assert_relative_eq!(result.intrinsics.fy(), truth().fy(), max_relative = 0.05);
    assert_eq!(result.intrinsics.distortion.len(), 8);
    assert!(result.mean_reproj_error_px < 1.0, "{}", result.mean_reproj_error_px);
    assert_eq!(result.frames_used(), views.len());

    let held_out = BoardPose::centered(&board, [0.15, -0.2, 0.05], 1.0).unwrap();
    let image = render_view(&board, &truth(), image_size(), &held_out).unwrap();
    let boards = candidate_boards(&spec, &[result.dictionary_id()]).unwrap();
    let evaluation = evaluate_frame(
        "held_out.png",
        &image,
        &boards,
        &DetectionConfig::verification(),
        Some(&result.intrinsics),
        &Thresholds::default(),
    )
    .unwrap();

    let pose = evaluation.report.pose;
    assert!(pose.ok);
    let err = pose.reproj_error_px.unwrap();
    assert!(err < 1.0, "reprojection error {err}");
    assert_relative_eq!(pose.tvec[2], held_out.tvec[2], max_relative = 0.05);
}

#[test]
fn corpus_on_disk_calibrates_and_round_trips() {
    init_logger();
    let spec = BoardSpec::default();
    let board = make_board(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();

    for (i, pose) in calibration_poses(&board).unwrap().iter().enumerate() {
        let image = render_view(&board, &truth(), image_size(), pose).unwrap();
        let path = dir.path().join(format!("view_{:02}.png", i));
        imgcodecs::imwrite(&path.to_string_lossy(), &image, &Vector::new()).unwrap();
    }
    std::fs::write(dir.path().join("zz_broken.png"), b"not a png").unwrap();

    let pattern = dir.path().join("*.png");
    let paths = list_images(&pattern.to_string_lossy()).unwrap();
    assert_eq!(paths.len(), 8);

    let result = calibrate_corpus(&paths, &spec, &DetectionConfig::default()).unwrap();
    assert_eq!(result.dictionary_id(), DICT_7X7_1000);
    assert_eq!(result.frames_used(), 7);
    assert_eq!(result.image_size, (1280, 960));

    let record_path = dir.path().join("cam0_intrinsics.json");
    CalibrationRecord::from(&result)
        .write_json(&record_path)
        .unwrap();
    let record = CalibrationRecord::load_json(&record_path).unwrap();
    assert_eq!(record.intrinsics(), result.intrinsics);

    let cli = BoardSpec {
        squares_x: 5,
        squares_y: 5,
        ..BoardSpec::default()
    };
    assert_eq!(record.verification_board(&cli, false), spec);
}

#[test]
fn empty_corpus_fails_before_solving() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = dir.path().join("*.png");
    assert!(matches!(
        list_images(&pattern.to_string_lossy()),
        Err(Error::NoInput(_))
    ));
    assert!(matches!(
        calibrate_corpus(&[], &BoardSpec::default(), &DetectionConfig::default()),
        Err(Error::NoInput(_))
    ));
}
