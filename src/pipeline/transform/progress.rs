use crate::models::enums::StageName;

/// One progress line, emitted after every finished unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    pub percent: usize,
    /// First unit past a new tenth of the stage, or the last unit.
    pub milestone: bool,
}

/// Unit counter for one stage run.
///
/// Every unit is logged at debug level; each tenth of the way, and the
/// final unit, also get an info line.
pub struct Progress {
    book_id: i64,
    stage: StageName,
    done: usize,
    total: usize,
    last_logged_decile: usize,
}

impl Progress {
    pub fn new(book_id: i64, stage: StageName, total: usize) -> Self {
        tracing::info!(book_id, stage = stage.as_str(), total, "Stage started");
        Self {
            book_id,
            stage,
            done: 0,
            total,
            last_logged_decile: 0,
        }
    }

    pub fn advance(&mut self) -> ProgressEvent {
        self.done += 1;
        let percent = self.percent();
        let decile = percent / 10;
        let milestone = decile > self.last_logged_decile || self.done == self.total;

        tracing::debug!(
            book_id = self.book_id,
            stage = self.stage.as_str(),
            done = self.done,
            total = self.total,
            percent,
            "Unit done"
        );
        if milestone {
            self.last_logged_decile = decile;
            tracing::info!(
                book_id = self.book_id,
                stage = self.stage.as_str(),
                done = self.done,
                total = self.total,
                percent,
                "Stage progress"
            );
        }

        ProgressEvent {
            done: self.done,
            total: self.total,
            percent,
            milestone,
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            (self.done * 100 / self.total).min(100)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_tracks_done_units() {
        let mut progress = Progress::new(1, StageName::SimplifyText, 4);
        assert_eq!(progress.percent(), 0);
        progress.advance();
        assert_eq!(progress.percent(), 25);
        progress.advance();
        progress.advance();
        progress.advance();
        assert_eq!(progress.done(), 4);
        assert_eq!(progress.percent(), 100);
    }

    #[test]
    fn every_unit_is_reported() {
        let mut progress = Progress::new(1, StageName::TranslateSentences, 20);
        let events: Vec<ProgressEvent> = (0..20).map(|_| progress.advance()).collect();

        let done: Vec<usize> = events.iter().map(|e| e.done).collect();
        assert_eq!(done, (1..=20).collect::<Vec<_>>());
        assert!(events.iter().all(|e| e.total == 20));
        assert_eq!(events[0].percent, 5);

        // Info lines only at each new tenth: units 2, 4, .., 20
        let milestones: Vec<usize> = events.iter().filter(|e| e.milestone).map(|e| e.done).collect();
        assert_eq!(milestones, (1..=10).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn last_unit_is_a_milestone() {
        let mut progress = Progress::new(1, StageName::SimplifyText, 3);
        progress.advance();
        progress.advance();
        let last = progress.advance();
        assert!(last.milestone);
        assert_eq!(last.percent, 100);
    }

    #[test]
    fn empty_stage_is_complete() {
        assert_eq!(Progress::new(1, StageName::Export, 0).percent(), 100);
    }
}
