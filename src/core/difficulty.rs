use crate::config::ChainConfig;
use crate::core::Block;
use crate::error::{BlockchainError, Result};
use log::info;

/// Ratio retargeting over a window of `target_block_interval` blocks
pub struct DifficultyAdjustment;

impl DifficultyAdjustment {
    /// Index of the block that opens the window ending at `tip_index`, when the
    /// block after the tip is a retarget point
    pub fn window_start(config: &ChainConfig, tip_index: u64) -> Option<u64> {
        let interval = config.target_block_interval;
        if tip_index < interval || tip_index % interval != 0 {
            return None;
        }
        Some(tip_index - interval)
    }

    /// Difficulty required of the block that follows `tip`.
    ///
    /// `window_start` must be the block at [`DifficultyAdjustment::window_start`]
    /// whenever that returns `Some`.
    pub fn next_difficulty(
        config: &ChainConfig,
        tip: &Block,
        window_start: Option<&Block>,
    ) -> Result<u64> {
        let tip_index = tip.get_index();

        // Early blocks use the bootstrap difficulty
        if tip_index < config.target_block_interval {
            return Ok(config.bootstrap_difficulty);
        }

        let Some(expected_start) = Self::window_start(config, tip_index) else {
            return Ok(tip.get_difficulty());
        };

        let start = window_start.ok_or_else(|| {
            BlockchainError::InvalidBlock(format!(
                "Retarget at height {tip_index} needs block {expected_start}"
            ))
        })?;
        if start.get_index() != expected_start {
            return Err(BlockchainError::InvalidBlock(format!(
                "Retarget window starts at {expected_start}, got block {}",
                start.get_index()
            )));
        }

        // Peer-supplied times; a window that runs backwards counts as 1ms
        let actual = u64::try_from(tip.get_time().saturating_sub(start.get_time()))
            .unwrap_or(0)
            .max(1);
        let ideal = config.ideal_interval_ms();
        let new_difficulty = Self::adjust_difficulty(tip.get_difficulty(), ideal, actual);

        info!(
            "Difficulty adjustment at height {tip_index}: {} -> {new_difficulty} (actual: {actual}ms, target: {ideal}ms)",
            tip.get_difficulty()
        );
        Ok(new_difficulty)
    }

    /// round(current * ideal / actual), never below 1
    pub fn adjust_difficulty(current_difficulty: u64, ideal_ms: u64, actual_ms: u64) -> u64 {
        let actual = u128::from(actual_ms.max(1));
        let scaled = u128::from(current_difficulty) * u128::from(ideal_ms);
        let rounded = (2 * scaled + actual) / (2 * actual);
        u64::try_from(rounded).unwrap_or(u64::MAX).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn config() -> ChainConfig {
        ChainConfig {
            bootstrap_difficulty: 16,
            target_block_time_ms: 20_000,
            target_block_interval: 2,
            ..ChainConfig::development()
        }
    }

    fn block_at(index: u64, time: i64, difficulty: u64) -> Block {
        let coinbase = Transaction::new_coinbase("miner", 50, 0, time);
        Block::new_candidate("1.0.0", "prev", vec![coinbase], index, difficulty, time).unwrap()
    }

    #[test]
    fn test_bootstrap_below_interval() {
        let config = config();
        let tip = block_at(1, 1_000, 99);
        assert_eq!(
            DifficultyAdjustment::next_difficulty(&config, &tip, None).unwrap(),
            16
        );
    }

    #[test]
    fn test_carry_forward_between_retargets() {
        let config = config();
        let tip = block_at(3, 1_000, 21);
        assert_eq!(DifficultyAdjustment::window_start(&config, 3), None);
        assert_eq!(
            DifficultyAdjustment::next_difficulty(&config, &tip, None).unwrap(),
            21
        );
    }

    #[test]
    fn test_retarget_formula() {
        let config = config();
        // Window took 10s against an ideal of 40s: difficulty quadruples
        let start = block_at(2, 100_000, 16);
        let tip = block_at(4, 110_000, 16);
        assert_eq!(DifficultyAdjustment::window_start(&config, 4), Some(2));
        assert_eq!(
            DifficultyAdjustment::next_difficulty(&config, &tip, Some(&start)).unwrap(),
            64
        );

        // Window took 80s: difficulty halves
        let tip = block_at(4, 180_000, 16);
        assert_eq!(
            DifficultyAdjustment::next_difficulty(&config, &tip, Some(&start)).unwrap(),
            8
        );
    }

    #[test]
    fn test_adjustment_rounds_and_clamps() {
        assert_eq!(DifficultyAdjustment::adjust_difficulty(3, 40_000, 30_000), 4);
        assert_eq!(DifficultyAdjustment::adjust_difficulty(3, 40_000, 60_000), 2);
        assert_eq!(DifficultyAdjustment::adjust_difficulty(1, 1_000, 1_000_000), 1);
        assert_eq!(DifficultyAdjustment::adjust_difficulty(5, 1_000, 0), 5_000);
    }

    #[test]
    fn test_extreme_window_times_do_not_overflow() {
        let config = config();
        let start = block_at(2, i64::MAX, 16);
        let tip = block_at(4, i64::MIN, 16);
        assert_eq!(
            DifficultyAdjustment::next_difficulty(&config, &tip, Some(&start)).unwrap(),
            DifficultyAdjustment::adjust_difficulty(16, config.ideal_interval_ms(), 1)
        );

        let start = block_at(2, i64::MIN, 16);
        let tip = block_at(4, i64::MAX, 16);
        assert_eq!(
            DifficultyAdjustment::next_difficulty(&config, &tip, Some(&start)).unwrap(),
            1
        );
    }

    #[test]
    fn test_retarget_requires_window_block() {
        let config = config();
        let tip = block_at(4, 110_000, 16);
        assert!(DifficultyAdjustment::next_difficulty(&config, &tip, None).is_err());

        let wrong = block_at(3, 100_000, 16);
        assert!(DifficultyAdjustment::next_difficulty(&config, &tip, Some(&wrong)).is_err());
    }
}
