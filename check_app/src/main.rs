use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lib_cv::board::{Board, BoardSpec};
use lib_cv::calibration::Intrinsics;
use lib_cv::Error;
use lib_cv::config::{DetectionConfig, PipelineConfig, Thresholds};
use lib_cv::overlay::{OverlaySink, SinkAction, draw_overlay, draw_status};
use lib_cv::dictionary::candidate_boards;
use lib_cv::record::CalibrationRecord;
use lib_cv::source::{CameraSource, DirectorySource, FrameSource};
use lib_cv::verification::{FrameReport, Tally, evaluate_frame};
use log::{debug, error, info, warn};

/// Проверка калибровки: поиск доски ChArUco, поза и ошибка репроекции по каждому кадру.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Папка или шаблон изображений (например 'imgs/*.png' или 'imgs').
    #[arg(long)]
    images: Option<String>,

    /// Индекс камеры для проверки в реальном времени.
    #[arg(long)]
    webcam: Option<i32>,

    /// JSON с параметрами камеры (K, dist и параметры доски).
    #[arg(long)]
    calib: Option<PathBuf>,

    /// squaresX
    #[arg(long, default_value_t = 16)]
    sx: i32,

    /// squaresY
    #[arg(long, default_value_t = 11)]
    sy: i32,

    /// Сторона клетки в метрах.
    #[arg(long, default_value_t = 0.050)]
    square: f32,

    /// Сторона маркера в метрах.
    #[arg(long, default_value_t = 0.037)]
    marker: f32,

    /// Брать параметры доски из аргументов, а не из файла калибровки.
    #[arg(long)]
    board_from_cli: bool,

    /// Использовать только этот словарь (id OpenCV). Без него берётся словарь из файла
    /// калибровки или перебираются словари 7x7.
    #[arg(long)]
    force_dict: Option<i32>,

    /// Показывать кадры с разметкой.
    #[arg(long)]
    show: bool,

    /// Переключать изображения автоматически.
    #[arg(long)]
    autoadvance: bool,

    /// Задержка автопереключения, мс.
    #[arg(long, default_value_t = 500)]
    delay: i32,

    /// Папка для кадров с разметкой.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Минимум углов charuco для прохождения проверки.
    #[arg(long)]
    min_charuco: Option<usize>,

    /// Максимальная средняя ошибка репроекции, px.
    #[arg(long)]
    max_err: Option<f64>,

    /// JSON с порогами. Аргументы командной строки важнее.
    #[arg(long)]
    config: Option<PathBuf>,
}

struct Session {
    boards: Vec<Board>,
    detection: DetectionConfig,
    thresholds: Thresholds,
    intrinsics: Option<Intrinsics>,
}

impl Session {
    fn from_cli(cli: &Cli) -> lib_cv::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::load_json(path)?,
            None => PipelineConfig::verification(),
        };
        if let Some(n) = cli.min_charuco {
            config.thresholds.min_charuco = n;
        }
        if let Some(err) = cli.max_err {
            config.thresholds.max_error_px = err;
        }

        let cli_spec = BoardSpec {
            squares_x: cli.sx,
            squares_y: cli.sy,
            square_length_m: cli.square,
            marker_length_m: cli.marker,
            ..BoardSpec::default()
        };

        let record = match &cli.calib {
            Some(path) => {
                let record = CalibrationRecord::load_json(path)?;
                info!("Загружены параметры камеры из {}", path.display());
                Some(record)
            }
            None => {
                warn!("Параметры камеры не заданы, поза и ошибка репроекции недоступны");
                None
            }
        };

        let spec = match &record {
            Some(record) => record.verification_board(&cli_spec, cli.board_from_cli),
            None => cli_spec,
        };
        if let Some(dict) = cli.force_dict {
            config.detection.force_dictionary(dict);
        } else if let Some(dict) = record.as_ref().and_then(|r| r.dictionary_id) {
            config.detection.force_dictionary(dict);
        }

        let detection = config.verification_detection();
        let boards = candidate_boards(&spec, &detection.candidates)?;
        Ok(Self {
            boards,
            detection,
            thresholds: config.thresholds,
            intrinsics: record.map(|r| r.intrinsics()),
        })
    }
}

fn log_failure(report: &FrameReport) {
    if let Some(err) = report.failure.and_then(|f| f.as_error()) {
        debug!("{}: {}", report.name, err);
    }
}

fn run_images(source: &mut DirectorySource, session: &Session, cli: &Cli) -> lib_cv::Result<Tally> {
    let window = cli.show.then_some("ChArUco Check");
    let sink = OverlaySink::new(window, cli.save.clone());
    let wait_ms = if cli.autoadvance { cli.delay } else { 0 };
    let mut tally = Tally::default();
    info!("Изображений для проверки: {}", source.remaining());

    loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(Error::UnreadableImage(path)) => {
                warn!("Не получилось прочитать {}", path.display());
                tally.total += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let evaluation = evaluate_frame(
            &frame.name,
            &frame.gray()?,
            &session.boards,
            &session.detection,
            session.intrinsics.as_ref(),
            &session.thresholds,
        )?;
        println!("{}", evaluation.report);
        log_failure(&evaluation.report);
        tally.record(&evaluation.report);

        let overlay = draw_overlay(
            &frame.image,
            &evaluation.detection,
            &evaluation.report.pose,
            session.intrinsics.as_ref(),
        )?;
        if sink.show(&overlay, wait_ms)? == SinkAction::Quit {
            break;
        }
        sink.save(&frame.name, &overlay)?;
    }
    sink.close()?;
    Ok(tally)
}

fn run_webcam(source: &mut CameraSource, session: &Session, cli: &Cli) -> lib_cv::Result<Tally> {
    let mut sink = OverlaySink::new(Some("ChArUco Live Check"), cli.save.clone());
    let mut tally = Tally::default();
    println!("[INFO] 'q' - выход, 's' - сохранить кадр с разметкой.");

    while let Some(frame) = source.next_frame()? {
        let evaluation = evaluate_frame(
            &frame.name,
            &frame.gray()?,
            &session.boards,
            &session.detection,
            session.intrinsics.as_ref(),
            &session.thresholds,
        )?;
        log_failure(&evaluation.report);
        tally.record(&evaluation.report);

        let mut overlay = draw_overlay(
            &frame.image,
            &evaluation.detection,
            &evaluation.report.pose,
            session.intrinsics.as_ref(),
        )?;
        draw_status(&mut overlay, &evaluation.report)?;
        match sink.show(&overlay, 1)? {
            SinkAction::Quit => break,
            SinkAction::Save if sink.saves() => {
                sink.save_numbered("webcam", &overlay)?;
            }
            _ => {}
        }
    }
    sink.close()?;
    Ok(tally)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let session = match Session::from_cli(&cli) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = if let Some(index) = cli.webcam {
        CameraSource::open(index).and_then(|mut source| run_webcam(&mut source, &session, &cli))
    } else if let Some(pattern) = &cli.images {
        DirectorySource::from_pattern(pattern)
            .and_then(|mut source| run_images(&mut source, &session, &cli))
    } else {
        error!("Укажите --images или --webcam");
        return ExitCode::from(2);
    };

    match result {
        Ok(tally) => {
            println!(
                "[SUMMARY] {}/{} passed thresholds (min_charuco={}, max_err={}px).",
                tally.passed,
                tally.total,
                session.thresholds.min_charuco,
                session.thresholds.max_error_px
            );
            ExitCode::SUCCESS
        }
        Err(Error::NoInput(msg)) => {
            error!("{}", msg);
            ExitCode::from(3)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
