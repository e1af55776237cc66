// src/experiment/sensory.rs
//! Sensory-response phase states and trial transitions

use crate::experiment::sequencer::TrialInfo;

/// Sensory phase sub-states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensoryState {
    AwaitStart,
    Countdown,
    Stimulating,
    AwaitSensations,
    /// Waiting for the operator to start the next block
    BlockEnd,
    Complete,
}

/// What follows a recorded trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    NextTrial,
    EndOfBlock { completed_block: u32 },
    EndOfExperiment,
}

impl TrialOutcome {
    /// Classify the result of advancing past a trial of `previous_block`
    pub fn after_advance(previous_block: u32, next: Option<&TrialInfo>) -> Self {
        match next {
            None => TrialOutcome::EndOfExperiment,
            Some(trial) if trial.block != previous_block => TrialOutcome::EndOfBlock {
                completed_block: previous_block,
            },
            Some(_) => TrialOutcome::NextTrial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::types::ChannelId;

    fn trial(block: u32) -> TrialInfo {
        TrialInfo {
            overall_trial: 1,
            block,
            trial_in_block: 1,
            channels: vec![ChannelId::new(1).unwrap()],
            map_id: "horizontal".to_string(),
            electrodes: vec![(1, 2)],
        }
    }

    #[test]
    fn test_after_advance() {
        assert_eq!(TrialOutcome::after_advance(1, None), TrialOutcome::EndOfExperiment);
        assert_eq!(
            TrialOutcome::after_advance(1, Some(&trial(2))),
            TrialOutcome::EndOfBlock { completed_block: 1 }
        );
        assert_eq!(
            TrialOutcome::after_advance(2, Some(&trial(2))),
            TrialOutcome::NextTrial
        );
    }
}
