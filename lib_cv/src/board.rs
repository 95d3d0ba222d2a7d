use log::debug;
use opencv::core::{Mat, Point3f, Size, Vector};
use opencv::objdetect::{CharucoBoard, Dictionary, PredefinedDictionaryType};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DICT_7X7_250: i32 = PredefinedDictionaryType::DICT_7X7_250 as i32;
pub const DICT_7X7_1000: i32 = PredefinedDictionaryType::DICT_7X7_1000 as i32;

/// Словари для автоопределения. Сначала словарь большего объёма.
pub const DEFAULT_CANDIDATES: [i32; 2] = [DICT_7X7_1000, DICT_7X7_250];

/// Физические параметры доски ChArUco и словарь напечатанных на ней маркеров.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    pub squares_x: i32,       // columns of chessboard squares
    pub squares_y: i32,       // rows of chessboard squares
    pub square_length_m: f32, // square side in meters
    pub marker_length_m: f32, // marker side, same unit as square_length_m
    pub dictionary_id: i32,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            squares_x: 16,
            squares_y: 11,
            square_length_m: 0.050,
            marker_length_m: 0.037,
            dictionary_id: DICT_7X7_1000,
        }
    }
}

impl BoardSpec {
    pub fn with_dictionary(self, dictionary_id: i32) -> Self {
        Self {
            dictionary_id,
            ..self
        }
    }

    /// Количество внутренних углов шахматной доски.
    pub fn corner_count(&self) -> usize {
        ((self.squares_x - 1).max(0) * (self.squares_y - 1).max(0)) as usize
    }
}

/// 3D координаты (Z = 0) внутренних углов доски. Индекс в массиве совпадает с charuco id.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardGeometry {
    points: Vec<Point3f>,
}

impl BoardGeometry {
    pub fn points(&self) -> &[Point3f] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Точки доски для переданных id в том же порядке. `None`, если хотя бы один id вне диапазона.
    pub fn select(&self, ids: &Vector<i32>) -> Option<Vector<Point3f>> {
        ids.iter()
            .map(|id| usize::try_from(id).ok().and_then(|i| self.points.get(i).copied()))
            .collect()
    }
}

/// Доска, связанная со своим словарём. Передаётся явно в детекцию и решение позы.
pub struct Board {
    spec: BoardSpec,
    dictionary: Dictionary,
    charuco: CharucoBoard,
    geometry: BoardGeometry,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("spec", &self.spec)
            .field("corners", &self.geometry.len())
            .finish()
    }
}

pub fn get_dictionary(dictionary_id: i32) -> Result<Dictionary> {
    let dict_type = PredefinedDictionaryType::try_from(dictionary_id)
        .map_err(|_| Error::InvalidDictionary(dictionary_id))?;
    Ok(opencv::objdetect::get_predefined_dictionary(dict_type)?)
}

/// Создаёт доску по описанию. Для одинаковых описаний геометрия всегда одинакова.
pub fn make_board(spec: &BoardSpec) -> Result<Board> {
    let dictionary = get_dictionary(spec.dictionary_id)?;
    let charuco = CharucoBoard::new_def(
        Size::new(spec.squares_x, spec.squares_y),
        spec.square_length_m,
        spec.marker_length_m,
        &dictionary,
    )?;
    let geometry = BoardGeometry {
        points: charuco.get_chessboard_corners()?.to_vec(),
    };
    debug!(
        "Доска {}x{} (словарь {}): {} углов",
        spec.squares_x,
        spec.squares_y,
        spec.dictionary_id,
        geometry.len()
    );
    Ok(Board {
        spec: *spec,
        dictionary,
        charuco,
        geometry,
    })
}

impl Board {
    pub fn spec(&self) -> &BoardSpec {
        &self.spec
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn charuco(&self) -> &CharucoBoard {
        &self.charuco
    }

    pub fn geometry(&self) -> &BoardGeometry {
        &self.geometry
    }

    /// Изображение доски для печати: `px_per_square` пикселей на клетку и белое поле `margin_px`.
    pub fn render(&self, px_per_square: i32, margin_px: i32) -> Result<Mat> {
        let size = Size::new(
            self.spec.squares_x * px_per_square + 2 * margin_px,
            self.spec.squares_y * px_per_square + 2 * margin_px,
        );
        let mut image = Mat::default();
        self.charuco.generate_image(size, &mut image, margin_px, 1)?;
        Ok(image)
    }
}
