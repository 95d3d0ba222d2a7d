use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::board::DEFAULT_CANDIDATES;
use crate::error::Result;

/// Пороги детекции доски на одном кадре.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Минимум найденных маркеров, чтобы пытаться интерполировать углы.
    pub min_markers: usize,
    /// Минимум интерполированных углов charuco для успешной детекции.
    pub min_charuco: usize,
    /// Порядок перебора словарей при автоопределении.
    pub candidates: Vec<i32>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_markers: 8,
            min_charuco: 15,
            candidates: DEFAULT_CANDIDATES.to_vec(),
        }
    }
}

impl DetectionConfig {
    /// Мягкий гейт для проверки калибровки: доска считается найденной уже по одному маркеру
    /// и восьми углам, остальное решают пороги проверки.
    pub fn verification() -> Self {
        Self {
            min_markers: 1,
            min_charuco: 8,
            ..Self::default()
        }
    }

    /// Фиксированный словарь вместо перебора.
    pub fn force_dictionary(&mut self, dictionary_id: i32) {
        self.candidates = vec![dictionary_id];
    }
}

/// Критерии, по которым кадр проверки считается прошедшим.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_charuco: usize,
    pub max_error_px: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_charuco: 15,
            max_error_px: 0.80,
        }
    }
}

impl Thresholds {
    /// Обе границы включительно.
    pub fn passes(&self, charuco_count: usize, pose_ok: bool, reproj_error_px: f64) -> bool {
        charuco_count >= self.min_charuco && pose_ok && reproj_error_px <= self.max_error_px
    }
}

/// Содержимое файла `--config`. Отсутствующие поля берутся по умолчанию.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub thresholds: Thresholds,
}

impl PipelineConfig {
    pub fn verification() -> Self {
        Self {
            detection: DetectionConfig::verification(),
            thresholds: Thresholds::default(),
        }
    }

    /// Гейт детекции для проверки: порог углов не строже порога прохождения,
    /// иначе кадр с допустимым числом углов попал бы в «доска не найдена».
    pub fn verification_detection(&self) -> DetectionConfig {
        DetectionConfig {
            min_charuco: self.detection.min_charuco.min(self.thresholds.min_charuco),
            ..self.detection.clone()
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_boundaries_are_inclusive() {
        let t = Thresholds::default();
        assert!(t.passes(15, true, 0.80));
        assert!(!t.passes(14, true, 0.80));
        assert!(!t.passes(15, true, 0.81));
        assert!(!t.passes(40, false, 0.10));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"thresholds": {"max_error_px": 1.5}}"#).unwrap();
        assert_eq!(cfg.thresholds.max_error_px, 1.5);
        assert_eq!(cfg.thresholds.min_charuco, 15);
        assert_eq!(cfg.detection, DetectionConfig::default());
    }

    #[test]
    fn verification_gate_follows_lowered_threshold() {
        let mut cfg = PipelineConfig::default();
        cfg.thresholds.min_charuco = 10;
        assert_eq!(cfg.verification_detection().min_charuco, 10);
        assert_eq!(cfg.verification_detection().min_markers, 8);

        let mut cfg = PipelineConfig::verification();
        assert_eq!(cfg.verification_detection().min_charuco, 8);
        assert_eq!(cfg.verification_detection().min_markers, 1);
        cfg.thresholds.min_charuco = 4;
        assert_eq!(cfg.verification_detection().min_charuco, 4);
    }

    #[test]
    fn forced_dictionary_replaces_candidates() {
        let mut cfg = DetectionConfig::default();
        cfg.force_dictionary(3);
        assert_eq!(cfg.candidates, vec![3]);
    }
}
