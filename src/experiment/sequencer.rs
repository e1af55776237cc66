// src/experiment/sequencer.rs
//! Randomized block/trial order for the sensory phase

use crate::config::constants::device::{MAX_ELECTRODE, MIN_ELECTRODE};
use crate::config::constants::experiment::{MAX_BLOCKS, MAX_TRIALS_PER_BLOCK};
use crate::error::SequenceError;
use crate::hal::types::ChannelId;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One stimulate-then-query cycle. All numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialInfo {
    pub overall_trial: u32,
    pub block: u32,
    pub trial_in_block: u32,
    pub channels: Vec<ChannelId>,
    /// Channel-electrode map used by the trial's block
    pub map_id: String,
    /// Electrode pair of each channel, in channel order
    pub electrodes: Vec<(u8, u8)>,
}

/// Assignment of each channel to a pair of electrodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelElectrodeMap {
    pub id: String,
    pub electrodes: BTreeMap<ChannelId, (u8, u8)>,
}

impl ChannelElectrodeMap {
    pub fn new(
        id: impl Into<String>,
        electrodes: BTreeMap<ChannelId, (u8, u8)>,
    ) -> Result<Self, SequenceError> {
        let id = id.into();
        for (channel, (a, b)) in &electrodes {
            let valid = |e: &u8| (MIN_ELECTRODE..=MAX_ELECTRODE).contains(e);
            if !valid(a) || !valid(b) {
                return Err(SequenceError::InvalidSelection(format!(
                    "map '{}' assigns channel {} to electrodes ({}, {}) outside {}-{}",
                    id, channel, a, b, MIN_ELECTRODE, MAX_ELECTRODE
                )));
            }
        }
        Ok(Self { id, electrodes })
    }

    /// Neighbouring electrode pairs: 1:(1,2) 2:(3,4) ... 8:(15,16)
    pub fn horizontal() -> Self {
        let electrodes = ChannelId::all()
            .map(|ch| {
                let first = 2 * ch.get() - 1;
                (ch, (first, first + 1))
            })
            .collect();
        Self {
            id: "horizontal".to_string(),
            electrodes,
        }
    }

    /// Electrode pairs four apart within each half of the array
    pub fn vertical() -> Self {
        let electrodes = ChannelId::all()
            .map(|ch| {
                let n = ch.get();
                let first = if n <= 4 { n } else { n + 4 };
                (ch, (first, first + 4))
            })
            .collect();
        Self {
            id: "vertical".to_string(),
            electrodes,
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::horizontal(), Self::vertical()]
    }

    pub fn electrodes_for(&self, channel: ChannelId) -> Option<(u8, u8)> {
        self.electrodes.get(&channel).copied()
    }
}

/// Channel pool and the weights of drawing 1, 2, ... channels per trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSelection {
    pub pool: Vec<ChannelId>,
    /// `count_weights[i]` weights a trial with `i + 1` channels
    pub count_weights: Vec<u32>,
}

impl Default for ChannelSelection {
    /// All eight channels, fewer channels per trial being more likely
    fn default() -> Self {
        Self {
            pool: ChannelId::all().collect(),
            count_weights: (1..=8).rev().collect(),
        }
    }
}

impl ChannelSelection {
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.pool.is_empty() {
            return Err(SequenceError::InvalidSelection("channel pool is empty".to_string()));
        }
        let mut unique = self.pool.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != self.pool.len() {
            return Err(SequenceError::InvalidSelection(
                "channel pool contains duplicates".to_string(),
            ));
        }
        if self.count_weights.is_empty() || self.count_weights.iter().all(|w| *w == 0) {
            return Err(SequenceError::InvalidSelection(
                "at least one channel count needs a positive weight".to_string(),
            ));
        }
        if self.count_weights.len() > self.pool.len() {
            return Err(SequenceError::InvalidSelection(format!(
                "{} count weights for a pool of {} channels",
                self.count_weights.len(),
                self.pool.len()
            )));
        }
        Ok(())
    }
}

/// Ordered trial plan with a cursor on the active trial
#[derive(Debug, Clone)]
pub struct TrialSequencer {
    order: Vec<TrialInfo>,
    cursor: usize,
}

impl TrialSequencer {
    /// Generate a randomized plan of `n_blocks` blocks of `n_trials_per_block` trials.
    ///
    /// Maps are used cyclically, one per block.
    pub fn generate<R: Rng + ?Sized>(
        n_blocks: u32,
        n_trials_per_block: u32,
        maps: &[ChannelElectrodeMap],
        selection: &ChannelSelection,
        rng: &mut R,
    ) -> Result<Self, SequenceError> {
        if n_blocks == 0 {
            return Err(SequenceError::ZeroBlocks);
        }
        if n_trials_per_block == 0 {
            return Err(SequenceError::ZeroTrials);
        }
        let too_large = SequenceError::PlanTooLarge {
            n_blocks,
            n_trials_per_block,
            max_blocks: MAX_BLOCKS,
            max_trials_per_block: MAX_TRIALS_PER_BLOCK,
        };
        if n_blocks > MAX_BLOCKS || n_trials_per_block > MAX_TRIALS_PER_BLOCK {
            return Err(too_large);
        }
        let Some(total) = n_blocks.checked_mul(n_trials_per_block) else {
            return Err(too_large);
        };
        if maps.is_empty() {
            return Err(SequenceError::NoElectrodeMaps);
        }
        selection.validate()?;
        let count_dist = WeightedIndex::new(&selection.count_weights)
            .map_err(|e| SequenceError::InvalidSelection(e.to_string()))?;

        let mut order = Vec::with_capacity(total as usize);
        let mut map_cycle = maps.iter().cycle();
        for block in 1..=n_blocks {
            let Some(map) = map_cycle.next() else {
                return Err(SequenceError::NoElectrodeMaps);
            };
            for trial_in_block in 1..=n_trials_per_block {
                let n_channels = count_dist.sample(rng) + 1;
                let channels: Vec<ChannelId> = selection
                    .pool
                    .choose_multiple(rng, n_channels)
                    .copied()
                    .collect();
                let electrodes = electrodes_of(map, &channels)?;
                order.push(TrialInfo {
                    overall_trial: order.len() as u32 + 1,
                    block,
                    trial_in_block,
                    channels,
                    map_id: map.id.clone(),
                    electrodes,
                });
            }
        }

        debug!(
            blocks = n_blocks,
            trials = order.len(),
            "Stimulation order generated"
        );
        Ok(Self { order, cursor: 0 })
    }

    /// Use a prepared plan. Numbering must be contiguous: overall trials
    /// count from 1, blocks from 1 and trials restart at 1 in every block.
    pub fn from_trials(order: Vec<TrialInfo>) -> Result<Self, SequenceError> {
        if order.is_empty() {
            return Err(SequenceError::EmptyPlan);
        }
        let mut previous: Option<&TrialInfo> = None;
        for (index, trial) in order.iter().enumerate() {
            let out_of_order = |reason: String| SequenceError::OutOfOrder {
                overall_trial: trial.overall_trial,
                reason,
            };
            if trial.overall_trial as usize != index + 1 {
                return Err(out_of_order(format!("expected overall trial {}", index + 1)));
            }
            if trial.channels.is_empty() {
                return Err(out_of_order("no channels".to_string()));
            }
            let (expected_block, expected_trial) = match previous {
                None => (1, 1),
                Some(prev) if trial.block == prev.block => (prev.block, prev.trial_in_block + 1),
                Some(prev) => (prev.block + 1, 1),
            };
            if trial.block != expected_block || trial.trial_in_block != expected_trial {
                return Err(out_of_order(format!(
                    "expected block {} trial {}, found block {} trial {}",
                    expected_block, expected_trial, trial.block, trial.trial_in_block
                )));
            }
            previous = Some(trial);
        }
        Ok(Self { order, cursor: 0 })
    }

    pub fn current(&self) -> &TrialInfo {
        &self.order[self.cursor]
    }

    /// Move to the next trial. `None` means the last trial was already active;
    /// the cursor then stays on it.
    pub fn advance(&mut self) -> Option<&TrialInfo> {
        if self.cursor + 1 >= self.order.len() {
            debug!("End of experiment");
            return None;
        }
        self.cursor += 1;
        let trial = &self.order[self.cursor];
        debug!(block = trial.block, trial = trial.trial_in_block, "New trial");
        Some(trial)
    }

    /// Rewind to the first trial of the active block
    pub fn reset_to_block_start(&mut self) -> &TrialInfo {
        let offset = self.current().trial_in_block.saturating_sub(1) as usize;
        self.cursor -= offset.min(self.cursor);
        self.current()
    }

    pub fn block_count(&self) -> u32 {
        self.order.last().map(|trial| trial.block).unwrap_or(0)
    }

    pub fn trials_in_block(&self, block: u32) -> usize {
        self.order.iter().filter(|trial| trial.block == block).count()
    }

    pub fn trials_in_current_block(&self) -> usize {
        self.trials_in_block(self.current().block)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false; an empty plan cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[TrialInfo] {
        &self.order
    }

    /// Zero-based position of the active trial
    pub fn position(&self) -> usize {
        self.cursor
    }
}

fn electrodes_of(
    map: &ChannelElectrodeMap,
    channels: &[ChannelId],
) -> Result<Vec<(u8, u8)>, SequenceError> {
    channels
        .iter()
        .map(|channel| {
            map.electrodes_for(*channel)
                .ok_or_else(|| SequenceError::MissingChannel {
                    map_id: map.id.clone(),
                    channel: *channel,
                })
        })
        .collect()
}
