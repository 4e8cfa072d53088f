//! Estimate when terminal total difficulty is reached relative to the merge epoch.
//!
//! The execution layer switches to proof-of-stake once total difficulty
//! crosses the terminal threshold, while the consensus layer activates the
//! merge fork by epoch. Only genesis time ties the two together, so the
//! estimate assumes a constant block time and difficulty and is approximate.

use crate::{
    config::{Config, Fork},
    execution::GENESIS_DIFFICULTY,
};

/// Estimated alignment of the two merge triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeEstimate {
    /// Unix time at which the merge fork epoch begins.
    pub merge_epoch_start: u64,
    /// Number of the first block whose total difficulty reaches the threshold.
    pub terminal_block: u64,
    /// Estimated unix time of the terminal block.
    pub terminal_time: u64,
}

impl MergeEstimate {
    /// Estimate alignment for blocks produced every `block_time` seconds with
    /// `block_difficulty` each.
    ///
    /// Returns `None` when the merge fork is not scheduled or blocks carry no
    /// difficulty.
    pub fn new(config: &Config, block_time: u64, block_difficulty: u64) -> Option<Self> {
        let merge_epoch = config.forks.epoch(Fork::Merge)?;
        if block_difficulty == 0 {
            return None;
        }
        let remaining = config
            .terminal_total_difficulty
            .saturating_sub(GENESIS_DIFFICULTY);
        let terminal_block = remaining.div_ceil(block_difficulty);
        Some(Self {
            merge_epoch_start: config.epoch_start(merge_epoch),
            terminal_block,
            terminal_time: config
                .genesis_time
                .saturating_add(terminal_block.saturating_mul(block_time)),
        })
    }

    /// Whether the terminal block is expected before the merge fork activates.
    pub fn early(&self) -> bool {
        self.terminal_time < self.merge_epoch_start
    }

    /// Seconds between merge fork activation and the terminal block (negative when early).
    pub fn lag(&self) -> i128 {
        i128::from(self.terminal_time) - i128::from(self.merge_epoch_start)
    }
}
