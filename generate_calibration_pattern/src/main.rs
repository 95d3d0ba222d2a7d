use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lib_cv::board::{BoardSpec, DICT_7X7_1000, make_board};
use lib_cv::calibration::Intrinsics;
use lib_cv::record::CalibrationRecord;
use lib_cv::synthetic::{calibration_poses, render_view};
use log::{error, info, warn};
use opencv::core::{Size, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use opencv::objdetect::PredefinedDictionaryType;

/// Генерация доски ChArUco для печати и синтетических снимков с известной камерой.
#[derive(Parser)]
#[command(version)]
struct Cli {
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

    /// Словарь маркеров (id OpenCV).
    #[arg(long, default_value_t = DICT_7X7_1000)]
    dict: i32,

    /// Пикселей на клетку.
    #[arg(long, default_value_t = 100)]
    px_per_square: i32,

    /// Белое поле вокруг доски, px.
    #[arg(long, default_value_t = 0)]
    margin: i32,

    /// Файл доски.
    #[arg(long, default_value = "charuco_board.png")]
    out: PathBuf,

    /// Сколько синтетических снимков сделать.
    #[arg(long, default_value_t = 0)]
    views: usize,

    /// Папка для синтетических снимков и файла с параметрами камеры.
    #[arg(long, default_value = "synthetic_views")]
    views_dir: PathBuf,

    /// Фокусное расстояние синтетической камеры, px.
    #[arg(long, default_value_t = 1000.0)]
    focal: f64,

    /// Ширина синтетического снимка.
    #[arg(long, default_value_t = 1280)]
    width: i32,

    /// Высота синтетического снимка.
    #[arg(long, default_value_t = 960)]
    height: i32,

    /// Вывести доступные словари и выйти.
    #[arg(long)]
    list_dicts: bool,
}

struct ChArUcoDict {
    id: i32,
    name: String,
    amount: i32,
}

impl ChArUcoDict {
    fn new(id: i32) -> Option<Self> {
        let dict_type = PredefinedDictionaryType::try_from(id).ok()?;
        let name = format!("{:?}", dict_type);
        let amount = name
            .rsplit_once('_')
            .and_then(|(_, amount)| amount.parse().ok())?;
        Some(Self { id, name, amount })
    }
}

fn dictionaries() -> Vec<ChArUcoDict> {
    (0..=21).filter_map(ChArUcoDict::new).collect()
}

fn write_image(path: &PathBuf, image: &opencv::core::Mat) -> lib_cv::Result<()> {
    if !imgcodecs::imwrite(&path.to_string_lossy(), image, &Vector::new())? {
        return Err(lib_cv::Error::Io(std::io::Error::other(format!(
            "не удалось записать {}",
            path.display()
        ))));
    }
    Ok(())
}

fn run(cli: &Cli) -> lib_cv::Result<()> {
    let spec = BoardSpec {
        squares_x: cli.sx,
        squares_y: cli.sy,
        square_length_m: cli.square,
        marker_length_m: cli.marker,
        dictionary_id: cli.dict,
    };

    let markers = spec.squares_x * spec.squares_y / 2;
    if let Some(dict) = ChArUcoDict::new(spec.dictionary_id) {
        if markers > dict.amount {
            warn!(
                "Доске {}x{} нужно {} маркеров, а в {} только {}",
                spec.squares_x, spec.squares_y, markers, dict.name, dict.amount
            );
        }
    }

    let board = make_board(&spec)?;
    let pattern = board.render(cli.px_per_square, cli.margin)?;
    write_image(&cli.out, &pattern)?;
    info!(
        "Доска {}x{} записана в {} ({}x{} px)",
        spec.squares_x,
        spec.squares_y,
        cli.out.display(),
        pattern.cols(),
        pattern.rows()
    );

    if cli.views == 0 {
        return Ok(());
    }

    let poses = calibration_poses(&board)?;
    if cli.views > poses.len() {
        warn!("Доступно только {} поз, будет сделано {} снимков", poses.len(), poses.len());
    }
    fs::create_dir_all(&cli.views_dir)?;

    let size = Size::new(cli.width, cli.height);
    let intrinsics = Intrinsics::new(
        cli.focal,
        cli.focal,
        cli.width as f64 / 2.0,
        cli.height as f64 / 2.0,
    );
    for (i, pose) in poses.iter().take(cli.views).enumerate() {
        let view = render_view(&board, &intrinsics, size, pose)?;
        write_image(&cli.views_dir.join(format!("view_{:02}.png", i)), &view)?;
    }

    let truth = CalibrationRecord {
        camera_matrix: intrinsics.camera_matrix,
        distortion: intrinsics.distortion.clone(),
        dictionary_id: Some(spec.dictionary_id),
        squares_x: Some(spec.squares_x),
        squares_y: Some(spec.squares_y),
        square_length_m: Some(spec.square_length_m),
        marker_length_m: Some(spec.marker_length_m),
        image_size: Some([cli.width, cli.height]),
        reproj_error_px: None,
    };
    truth.write_json(cli.views_dir.join("truth_intrinsics.json"))?;
    info!(
        "Синтетические снимки ({}) и параметры камеры записаны в {}",
        cli.views.min(poses.len()),
        cli.views_dir.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.list_dicts {
        for dict in dictionaries() {
            println!("{:>2}  {:<24} {}", dict.id, dict.name, dict.amount);
        }
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
