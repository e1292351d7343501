use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Tuning knobs for one pipeline instance.
///
/// Every field has a serde-level default so partial configuration files stay
/// valid; `validate` rejects degenerate combinations at construction time, the
/// only point where this crate surfaces an error to the caller.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Ingestion buffer bound; oldest samples are dropped beyond it.
    pub background_buffer_size: usize,
    /// Maximum samples routed per processor tick.
    pub chunk_size: usize,
    /// Preallocation capacity (and hard bound) of each series buffer.
    pub series_capacity: usize,
    /// Bound of the deferred-retry set for not-yet-resolvable samples.
    pub deferred_capacity: usize,
    /// Attempts before a deferred sample or live-entry window reset gives up.
    pub retry_budget: u32,
    /// Width of the tailing window while in live mode.
    pub default_live_width_ms: u64,
    /// Right-edge padding added past the data clock when tailing.
    pub live_padding_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            background_buffer_size: 200_000,
            chunk_size: 5_000,
            series_capacity: 100_000,
            deferred_capacity: 10_000,
            retry_budget: 60,
            default_live_width_ms: 120_000,
            live_padding_ms: 2_000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.background_buffer_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "background_buffer_size must be non-zero",
            ));
        }
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig("chunk_size must be non-zero"));
        }
        if self.series_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "series_capacity must be non-zero",
            ));
        }
        if self.default_live_width_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "default_live_width_ms must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validate() {
        struct TestCase {
            input: Config,
            expected_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: defaults are valid
                input: Config::default(),
                expected_ok: true,
            },
            TestCase {
                // TC1: zero ingestion bound rejected
                input: Config {
                    background_buffer_size: 0,
                    ..Config::default()
                },
                expected_ok: false,
            },
            TestCase {
                // TC2: zero chunk size rejected
                input: Config {
                    chunk_size: 0,
                    ..Config::default()
                },
                expected_ok: false,
            },
            TestCase {
                // TC3: zero live width rejected
                input: Config {
                    default_live_width_ms: 0,
                    ..Config::default()
                },
                expected_ok: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                test.input.validate().is_ok(),
                test.expected_ok,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_config_partial_deserialization_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"chunk_size": 128}"#).unwrap();
        assert_eq!(config.chunk_size, 128);
        assert_eq!(
            config.background_buffer_size,
            Config::default().background_buffer_size
        );
    }
}
