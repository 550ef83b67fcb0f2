use crate::CoreError;
use flipper_docker_schema::RunLevel;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Repair,
    Normal,
    Done,
    Aborted,
}

impl RunState {
    pub fn run_level(self) -> Option<RunLevel> {
        match self {
            RunState::Repair => Some(RunLevel::Repair),
            RunState::Normal => Some(RunLevel::Normal),
            RunState::Done | RunState::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }
}

impl From<RunLevel> for RunState {
    fn from(level: RunLevel) -> Self {
        match level {
            RunLevel::Repair => RunState::Repair,
            RunLevel::Normal => RunState::Normal,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Repair => "repair",
            RunState::Normal => "normal",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: RunState, to: RunState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (RunState::Repair, RunState::Normal)
            | (RunState::Normal, RunState::Done)
            | (RunState::Repair | RunState::Normal, RunState::Aborted)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(RunState::Repair, RunState::Normal).is_ok());
        assert!(validate_transition(RunState::Repair, RunState::Aborted).is_ok());
        assert!(validate_transition(RunState::Normal, RunState::Done).is_ok());
        assert!(validate_transition(RunState::Normal, RunState::Aborted).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        // Normal is never reached except through a clean Repair.
        assert!(validate_transition(RunState::Done, RunState::Normal).is_err());
        assert!(validate_transition(RunState::Aborted, RunState::Normal).is_err());
        assert!(validate_transition(RunState::Repair, RunState::Done).is_err());
        assert!(validate_transition(RunState::Normal, RunState::Repair).is_err());
        assert!(validate_transition(RunState::Done, RunState::Aborted).is_err());
        assert!(validate_transition(RunState::Normal, RunState::Normal).is_err());
    }

    #[test]
    fn states_map_to_run_levels() {
        assert_eq!(RunState::from(RunLevel::Repair), RunState::Repair);
        assert_eq!(RunState::Normal.run_level(), Some(RunLevel::Normal));
        assert_eq!(RunState::Done.run_level(), None);
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Repair.is_terminal());
    }
}
