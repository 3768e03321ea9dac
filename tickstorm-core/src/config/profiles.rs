//! Configuration presets
//!
//! - Demo: few traders, readable stream, verbose logging
//! - LoadTest: wide batches, aggressive throttling, larger pools
//! - Soak: long-running, strict pool health limits

use super::types::*;

/// Configuration profile name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileName {
    Demo,
    LoadTest,
    Soak,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::LoadTest => "load-test",
            Self::Soak => "soak",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "demo" | "dev" => Some(Self::Demo),
            "load" | "load-test" | "loadtest" => Some(Self::LoadTest),
            "soak" => Some(Self::Soak),
            _ => None,
        }
    }
}

pub struct ConfigProfile;

impl ConfigProfile {
    pub fn for_name(name: ProfileName) -> CoreConfig {
        match name {
            ProfileName::Demo => Self::demo(),
            ProfileName::LoadTest => Self::load_test(),
            ProfileName::Soak => Self::soak(),
        }
    }

    /// Small market, debug logs, one-second throttle window
    pub fn demo() -> CoreConfig {
        CoreConfig {
            simulation: SimulationDefaults {
                trader_count: 24,
                ..Default::default()
            },
            broadcast: BroadcastConfig {
                throttle_interval_ms: 1_000,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_level: "debug".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Full trader population, parallel decisions from speed 1
    pub fn load_test() -> CoreConfig {
        CoreConfig {
            workers: WorkerConfig {
                parallel_speed_threshold: 1.0,
                min_parallel_batch: 8,
                ..Default::default()
            },
            pools: PoolConfig {
                trade_pool_size: 8_000,
                position_pool_size: 1_024,
                ..Default::default()
            },
            batching: BatchConfig {
                initial_batch_size: 64,
                max_batch_size: 512,
                ..Default::default()
            },
            generator: GeneratorConfig {
                max_processed_per_tick: 4_000,
                ..Default::default()
            },
            broadcast: BroadcastConfig {
                throttle_interval_ms: 250,
                high_tps_threshold: 500.0,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                metrics_addr: Some("127.0.0.1:9090".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Long runs: a single foreign release or modest leak flags the pool
    pub fn soak() -> CoreConfig {
        CoreConfig {
            pools: PoolConfig {
                max_leak: 5_000,
                max_cross_pool_attempts: 0,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_level: "warn".to_string(),
                json_logs: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_validate() {
        for name in [ProfileName::Demo, ProfileName::LoadTest, ProfileName::Soak] {
            ConfigProfile::for_name(name)
                .validate()
                .unwrap_or_else(|e| panic!("{} invalid: {}", name.as_str(), e));
        }
    }

    #[test]
    fn test_profile_name_parse() {
        assert_eq!(ProfileName::parse("DEMO"), Some(ProfileName::Demo));
        assert_eq!(ProfileName::parse("load-test"), Some(ProfileName::LoadTest));
        assert_eq!(ProfileName::parse("prod"), None);
    }
}
