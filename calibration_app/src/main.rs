use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lib_cv::board::BoardSpec;
use lib_cv::calibration::calibrate_corpus;
use lib_cv::config::PipelineConfig;
use lib_cv::record::CalibrationRecord;
use lib_cv::source::list_images;
use log::{error, info};

/// Калибровка камеры по снимкам доски ChArUco.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Папка или шаблон изображений (например 'cam0_imgs/*.png').
    #[arg(long, default_value = "cam0_imgs/*.png")]
    images: String,

    /// Куда записать параметры камеры (JSON).
    #[arg(long, default_value = "cam0_intrinsics.json")]
    out: PathBuf,

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

    /// Использовать только этот словарь (id OpenCV, например 15 для DICT_7X7_1000).
    #[arg(long)]
    force_dict: Option<i32>,

    /// Минимум маркеров на изображении.
    #[arg(long)]
    min_markers: Option<usize>,

    /// Минимум углов charuco на изображении.
    #[arg(long)]
    min_charuco: Option<usize>,

    /// JSON с порогами детекции. Аргументы командной строки важнее.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn run(cli: &Cli) -> lib_cv::Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dict) = cli.force_dict {
        config.detection.force_dictionary(dict);
    }
    if let Some(n) = cli.min_markers {
        config.detection.min_markers = n;
    }
    if let Some(n) = cli.min_charuco {
        config.detection.min_charuco = n;
    }

    let spec = BoardSpec {
        squares_x: cli.sx,
        squares_y: cli.sy,
        square_length_m: cli.square,
        marker_length_m: cli.marker,
        ..BoardSpec::default()
    };

    let paths = list_images(&cli.images)?;
    info!("Найдено {} изображений по шаблону {}", paths.len(), cli.images);

    let result = calibrate_corpus(&paths, &spec, &config.detection)?;

    println!("Reprojection error (px): {}", result.mean_reproj_error_px);
    println!("Словарь: {}", result.dictionary_id());
    println!("Изображений использовано: {}", result.frames_used());
    println!("Матрица внутренних параметров:");
    for row in &result.intrinsics.camera_matrix {
        println!("  {:?}", row);
    }
    println!("Коэффициенты искажения:");
    println!("  {:?}", result.intrinsics.distortion);

    CalibrationRecord::from(&result).write_json(&cli.out)?;
    info!("Параметры камеры сохранены в {}", cli.out.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Ошибка калибровки: {}", e);
            ExitCode::FAILURE
        }
    }
}
