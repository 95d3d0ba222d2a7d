use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::board::BoardSpec;
use crate::calibration::{CalibrationResult, Intrinsics};
use crate::error::Result;

/// Сохранённый результат калибровки. Единственная связь между калибровкой и проверкой.
///
/// Имена полей совпадают с форматом `cam0_intrinsics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    #[serde(rename = "K")]
    pub camera_matrix: [[f64; 3]; 3],
    #[serde(rename = "dist")]
    pub distortion: Vec<f64>,
    #[serde(rename = "dict", default)]
    pub dictionary_id: Option<i32>,
    #[serde(rename = "SX", default)]
    pub squares_x: Option<i32>,
    #[serde(rename = "SY", default)]
    pub squares_y: Option<i32>,
    #[serde(rename = "square_m", default)]
    pub square_length_m: Option<f32>,
    #[serde(rename = "marker_m", default)]
    pub marker_length_m: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproj_error_px: Option<f64>,
}

impl From<&CalibrationResult> for CalibrationRecord {
    fn from(result: &CalibrationResult) -> Self {
        Self {
            camera_matrix: result.intrinsics.camera_matrix,
            distortion: result.intrinsics.distortion.clone(),
            dictionary_id: Some(result.board.dictionary_id),
            squares_x: Some(result.board.squares_x),
            squares_y: Some(result.board.squares_y),
            square_length_m: Some(result.board.square_length_m),
            marker_length_m: Some(result.board.marker_length_m),
            image_size: Some([result.image_size.0, result.image_size.1]),
            reproj_error_px: Some(result.mean_reproj_error_px),
        }
    }
}

impl CalibrationRecord {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics {
            camera_matrix: self.camera_matrix,
            distortion: self.distortion.clone(),
        }
    }

    /// Доска для проверки. Параметры из файла важнее параметров командной строки,
    /// если только `board_from_cli` не задан явно. Отсутствующие в файле поля
    /// берутся из `cli` с предупреждением.
    pub fn verification_board(&self, cli: &BoardSpec, board_from_cli: bool) -> BoardSpec {
        if board_from_cli {
            return *cli;
        }
        let spec = BoardSpec {
            squares_x: self.squares_x.unwrap_or(cli.squares_x),
            squares_y: self.squares_y.unwrap_or(cli.squares_y),
            square_length_m: self.square_length_m.unwrap_or(cli.square_length_m),
            marker_length_m: self.marker_length_m.unwrap_or(cli.marker_length_m),
            dictionary_id: self.dictionary_id.unwrap_or(cli.dictionary_id),
        };
        if !self.has_board() {
            warn!("В файле калибровки нет полных параметров доски, недостающие взяты из аргументов");
        } else if spec != cli.with_dictionary(spec.dictionary_id) {
            warn!(
                "Параметры доски из файла калибровки ({}x{}, {} м, {} м) отличаются от аргументов, используются параметры из файла",
                spec.squares_x, spec.squares_y, spec.square_length_m, spec.marker_length_m
            );
        }
        spec
    }

    fn has_board(&self) -> bool {
        self.squares_x.is_some()
            && self.squares_y.is_some()
            && self.square_length_m.is_some()
            && self.marker_length_m.is_some()
    }
}
