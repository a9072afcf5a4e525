use crate::domain::models::{difficulty_slots, Difficulty};

/// Exclusive easy/average/difficult selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DifficultySelector {
    selected: Option<Difficulty>,
}

impl DifficultySelector {
    pub fn new(selected: Option<Difficulty>) -> Self {
        Self { selected }
    }

    pub fn selected(&self) -> Option<Difficulty> {
        self.selected
    }

    /// Activates `difficulty` and deactivates the other slots. Selecting the
    /// slot that is already active clears the selection.
    pub fn select(&mut self, difficulty: Difficulty) -> Option<Difficulty> {
        self.selected = if self.selected == Some(difficulty) {
            None
        } else {
            Some(difficulty)
        };
        self.selected
    }

    /// Slot-level input: turning a slot on selects it, turning the active
    /// slot off clears, turning an inactive slot off changes nothing.
    pub fn set_slot(&mut self, difficulty: Difficulty, active: bool) -> Option<Difficulty> {
        match (active, self.selected == Some(difficulty)) {
            (true, _) => self.selected = Some(difficulty),
            (false, true) => self.selected = None,
            (false, false) => {}
        }
        self.selected
    }

    pub fn clear(&mut self) -> Option<Difficulty> {
        self.selected = None;
        self.selected
    }

    pub fn is_active(&self, difficulty: Difficulty) -> bool {
        self.selected == Some(difficulty)
    }

    pub fn slots(&self) -> [bool; 3] {
        difficulty_slots(self.selected)
    }
}
