use crate::domain::recommendation::PredictionCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub best_index: usize,
    pub degraded: bool,
}

// Highest predicted price among rule-viable candidates, earliest date on a
// tie; with no viable candidate, the overall maximum flagged degraded. Only
// an empty horizon selects nothing.
pub fn select(candidates: &[PredictionCandidate]) -> Option<Selection> {
    if let Some(best_index) = best_by_price(candidates, |candidate| candidate.viable) {
        return Some(Selection {
            best_index,
            degraded: false,
        });
    }
    best_by_price(candidates, |_| true).map(|best_index| Selection {
        best_index,
        degraded: true,
    })
}

fn best_by_price(
    candidates: &[PredictionCandidate],
    eligible: impl Fn(&PredictionCandidate) -> bool,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    // Strictly-greater comparison in date order keeps the earliest date on
    // ties.
    for (index, candidate) in candidates.iter().enumerate() {
        if !eligible(candidate) {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, price)) => candidate.predicted_price > price,
        };
        if better {
            best = Some((index, candidate.predicted_price));
        }
    }
    best.map(|(index, _)| index)
}
