use log::{debug, info};
use opencv::core::Mat;

use crate::board::{Board, BoardSpec, make_board};
use crate::config::DetectionConfig;
use crate::detection::{DetectionResult, detect};
use crate::error::Result;

/// Доски для всех словарей-кандидатов, в порядке перебора. Строятся один раз на прогон.
pub fn candidate_boards(spec: &BoardSpec, candidates: &[i32]) -> Result<Vec<Board>> {
    candidates
        .iter()
        .map(|&dictionary_id| make_board(&spec.with_dictionary(dictionary_id)))
        .collect()
}

#[derive(Debug)]
pub struct Resolution<'a> {
    pub board: &'a Board,
    pub detection: DetectionResult,
}

impl Resolution<'_> {
    pub fn dictionary_id(&self) -> i32 {
        self.board.spec().dictionary_id
    }
}

/// Перебирает доски по порядку и возвращает первую, на которой детекция прошла оба
/// порога. `None` означает, что доска не найдена, это не ошибка.
pub fn resolve<'a>(
    gray: &Mat,
    boards: &'a [Board],
    config: &DetectionConfig,
) -> Result<Option<Resolution<'a>>> {
    for board in boards {
        let detection = detect(gray, board, config)?;
        if detection.success {
            return Ok(Some(Resolution { board, detection }));
        }
    }
    Ok(None)
}

/// Самый частый победитель. При равенстве побеждает словарь, выигравший раньше.
pub fn majority_vote<I: IntoIterator<Item = i32>>(winners: I) -> Option<i32> {
    let mut tally: Vec<(i32, usize)> = Vec::new();
    for id in winners {
        match tally.iter_mut().find(|(d, _)| *d == id) {
            Some((_, n)) => *n += 1,
            None => tally.push((id, 1)),
        }
    }
    tally
        .into_iter()
        .rev()
        .max_by_key(|&(_, n)| n)
        .map(|(d, _)| d)
}

pub struct CorpusSelection {
    pub board: Board,
    /// По одному элементу на изображение корпуса. `None` для изображений без
    /// подходящей детекции на выбранном словаре.
    pub detections: Vec<Option<DetectionResult>>,
}

impl CorpusSelection {
    pub fn dictionary_id(&self) -> i32 {
        self.board.spec().dictionary_id
    }

    pub fn qualifying(&self) -> usize {
        self.detections.iter().flatten().count()
    }
}

/// Выбор словаря для всего корпуса голосованием по изображениям.
///
/// Изображения, где победил другой словарь или никакой, проверяются повторно только
/// на выбранном словаре.
pub fn select_corpus_dictionary(
    images: &[Mat],
    spec: &BoardSpec,
    config: &DetectionConfig,
) -> Result<Option<CorpusSelection>> {
    let boards = candidate_boards(spec, &config.candidates)?;
    let mut resolutions = Vec::with_capacity(images.len());
    for gray in images {
        let resolution = resolve(gray, &boards, config)?;
        resolutions.push(resolution.map(|r| (r.dictionary_id(), r.detection)));
    }

    let Some(dictionary_id) = majority_vote(resolutions.iter().flatten().map(|(id, _)| *id))
    else {
        info!("Ни на одном из {} изображений доска не найдена", images.len());
        return Ok(None);
    };
    let Some(board) = boards
        .into_iter()
        .find(|b| b.spec().dictionary_id == dictionary_id)
    else {
        return Ok(None);
    };

    // при повторной проверке достаточно любого числа маркеров, решает порог углов
    let recheck = DetectionConfig {
        min_markers: 1,
        ..config.clone()
    };
    let mut detections = Vec::with_capacity(images.len());
    for (i, (gray, resolution)) in images.iter().zip(resolutions).enumerate() {
        match resolution {
            Some((id, detection)) if id == dictionary_id => detections.push(Some(detection)),
            _ => {
                let detection = detect(gray, &board, &recheck)?;
                debug!(
                    "Изображение {} перепроверено на словаре {}: {}",
                    i, dictionary_id, detection.success
                );
                detections.push(detection.success.then_some(detection));
            }
        }
    }

    let selection = CorpusSelection { board, detections };
    info!(
        "Выбран словарь {}: подходящих изображений {} из {}",
        dictionary_id,
        selection.qualifying(),
        images.len()
    );
    Ok(Some(selection))
}
