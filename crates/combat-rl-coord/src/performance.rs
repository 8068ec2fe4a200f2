//! Frame budget monitoring and the degradation ladder

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use combat_rl_core::{CombatError, Result};

/// How hard the system is throttling itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Full work
    #[default]
    None,
    /// Approaching a budget
    Low,
    /// At a budget
    Medium,
    /// Clearly over a budget
    High,
    /// Far over a budget
    Severe,
}

impl DegradationLevel {
    /// Every level, mildest first
    pub const ALL: [DegradationLevel; 5] = [Self::None, Self::Low, Self::Medium, Self::High, Self::Severe];

    /// Level for the worst measured/threshold ratio
    #[must_use]
    pub fn for_ratio(ratio: f64, soft_threshold: f64) -> Self {
        if ratio >= 1.5 {
            Self::Severe
        } else if ratio >= 1.2 {
            Self::High
        } else if ratio >= 1.0 {
            Self::Medium
        } else if ratio >= soft_threshold {
            Self::Low
        } else {
            Self::None
        }
    }

    /// Numeric severity, 0 for `None`
    #[must_use]
    pub fn severity(self) -> u8 {
        self as u8
    }
}

/// Work allowance at one level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSettings {
    /// Replay batch size handed to agents
    pub batch_size: usize,
    /// Policy updates per tick
    pub max_agents_per_frame: usize,
    /// Ticks between update slices
    pub update_interval: u64,
}

impl LevelSettings {
    const fn new(batch_size: usize, max_agents_per_frame: usize, update_interval: u64) -> Self {
        Self {
            batch_size,
            max_agents_per_frame,
            update_interval,
        }
    }
}

/// Settings for every level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationTable {
    /// No degradation
    pub none: LevelSettings,
    /// Low
    pub low: LevelSettings,
    /// Medium
    pub medium: LevelSettings,
    /// High
    pub high: LevelSettings,
    /// Severe
    pub severe: LevelSettings,
}

impl Default for DegradationTable {
    fn default() -> Self {
        Self {
            none: LevelSettings::new(32, 8, 1),
            low: LevelSettings::new(24, 6, 1),
            medium: LevelSettings::new(16, 4, 2),
            high: LevelSettings::new(8, 2, 4),
            severe: LevelSettings::new(4, 1, 8),
        }
    }
}

impl DegradationTable {
    /// Settings of a level
    #[must_use]
    pub fn get(&self, level: DegradationLevel) -> LevelSettings {
        match level {
            DegradationLevel::None => self.none,
            DegradationLevel::Low => self.low,
            DegradationLevel::Medium => self.medium,
            DegradationLevel::High => self.high,
            DegradationLevel::Severe => self.severe,
        }
    }

    /// Every level must allow some work and no level may allow more than a
    /// milder one.
    pub fn validate(&self) -> Result<()> {
        let rows: Vec<LevelSettings> = DegradationLevel::ALL.iter().map(|l| self.get(*l)).collect();
        if rows
            .iter()
            .any(|r| r.batch_size == 0 || r.max_agents_per_frame == 0 || r.update_interval == 0)
        {
            return Err(CombatError::Config("degradation settings must be non-zero".into()));
        }
        let monotonic = rows.windows(2).all(|w| {
            w[1].batch_size <= w[0].batch_size
                && w[1].max_agents_per_frame <= w[0].max_agents_per_frame
                && w[1].update_interval >= w[0].update_interval
        });
        if !monotonic {
            return Err(CombatError::Config(
                "degradation table must shrink work as severity rises".into(),
            ));
        }
        Ok(())
    }
}

/// Settings currently in force, as broadcast to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationSettings {
    /// Level
    pub level: DegradationLevel,
    /// Replay batch size handed to agents
    pub batch_size: usize,
    /// Policy updates per tick
    pub max_agents_per_frame: usize,
    /// Ticks between update slices
    pub update_interval: u64,
}

impl DegradationSettings {
    fn from_table(table: &DegradationTable, level: DegradationLevel) -> Self {
        let row = table.get(level);
        Self {
            level,
            batch_size: row.batch_size,
            max_agents_per_frame: row.max_agents_per_frame,
            update_interval: row.update_interval,
        }
    }
}

/// Budgets and sampling of the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Frame time budget in milliseconds
    pub frame_time_threshold_ms: f64,
    /// Memory budget in mebibytes
    pub memory_threshold_mb: f64,
    /// Active agent budget
    pub agent_threshold: usize,
    /// Ratio at which `Low` starts
    pub soft_threshold: f64,
    /// Samples kept for statistics
    pub history_len: usize,
    /// Ticks between samples
    pub sample_interval: u64,
    /// Settings per level
    pub table: DegradationTable,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            frame_time_threshold_ms: 16.67,
            memory_threshold_mb: 256.0,
            agent_threshold: 32,
            soft_threshold: 0.8,
            history_len: 120,
            sample_interval: 1,
            table: DegradationTable::default(),
        }
    }
}

impl PerformanceConfig {
    /// Reject budgets the monitor cannot divide by
    pub fn validate(&self) -> Result<()> {
        if self.frame_time_threshold_ms <= 0.0 || self.memory_threshold_mb <= 0.0 || self.agent_threshold == 0 {
            return Err(CombatError::Config("performance thresholds must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.soft_threshold) {
            return Err(CombatError::Config("soft_threshold must lie in [0, 1)".into()));
        }
        if self.history_len == 0 || self.sample_interval == 0 {
            return Err(CombatError::Config("history_len and sample_interval must be non-zero".into()));
        }
        self.table.validate()
    }
}

/// One measurement
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameSample {
    /// Duration of the last frame
    pub frame_time: Duration,
    /// Memory in use, host-reported or estimated
    pub memory_bytes: u64,
    /// Active agents
    pub agent_count: usize,
}

impl FrameSample {
    /// Frame time in milliseconds
    #[must_use]
    pub fn frame_ms(&self) -> f64 {
        self.frame_time.as_secs_f64() * 1000.0
    }

    /// Worst of the frame, memory and agent ratios against `config`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn worst_ratio(&self, config: &PerformanceConfig) -> f64 {
        let frame = self.frame_ms() / config.frame_time_threshold_ms;
        let memory = self.memory_bytes as f64 / (config.memory_threshold_mb * 1024.0 * 1024.0);
        let agents = self.agent_count as f64 / config.agent_threshold as f64;
        [frame, memory, agents]
            .into_iter()
            .filter(|r| r.is_finite())
            .fold(0.0, f64::max)
    }
}

/// Snapshot for hosts and dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStatus {
    /// Settings in force
    pub settings: DegradationSettings,
    /// Ratio that picked the level
    pub last_ratio: f64,
    /// Samples taken since start
    pub samples: u64,
    /// Mean frame time over the window
    pub mean_frame_ms: f64,
    /// Standard deviation of frame time over the window
    pub std_dev_frame_ms: f64,
    /// Worst frame time over the window
    pub max_frame_ms: f64,
    /// 95th percentile frame time over the window
    pub p95_frame_ms: f64,
    /// Memory of the latest sample
    pub memory_bytes: u64,
    /// Agent count of the latest sample
    pub agent_count: usize,
}

/// Watches the frame budget and picks the degradation level
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    history: VecDeque<FrameSample>,
    last_ratio: f64,
    samples: u64,
    sender: watch::Sender<DegradationSettings>,
}

impl PerformanceMonitor {
    /// Create a monitor starting at [`DegradationLevel::None`]
    #[must_use]
    pub fn new(config: PerformanceConfig) -> Self {
        let initial = DegradationSettings::from_table(&config.table, DegradationLevel::None);
        let (sender, _) = watch::channel(initial);
        Self {
            history: VecDeque::with_capacity(config.history_len),
            config,
            last_ratio: 0.0,
            samples: 0,
            sender,
        }
    }

    /// Monitor configuration
    #[must_use]
    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// Settings in force
    #[must_use]
    pub fn settings(&self) -> DegradationSettings {
        *self.sender.borrow()
    }

    /// Current level
    #[must_use]
    pub fn level(&self) -> DegradationLevel {
        self.settings().level
    }

    /// Receive every settings change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DegradationSettings> {
        self.sender.subscribe()
    }

    /// Record a sample if `tick` falls on the sampling interval
    pub fn observe(&mut self, tick: u64, sample: FrameSample) -> Option<DegradationSettings> {
        if tick % self.config.sample_interval.max(1) != 0 {
            return None;
        }
        self.record(sample)
    }

    /// Record a sample and move to the level it calls for. Returns the new
    /// settings when the level changed.
    pub fn record(&mut self, sample: FrameSample) -> Option<DegradationSettings> {
        if self.history.len() >= self.config.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.samples += 1;

        let ratio = sample.worst_ratio(&self.config);
        self.last_ratio = ratio;
        metrics::histogram!("combat_rl.frame_time_ms", sample.frame_ms());

        let level = DegradationLevel::for_ratio(ratio, self.config.soft_threshold);
        let previous = self.level();
        if level == previous {
            return None;
        }
        if level > previous {
            warn!(from = ?previous, to = ?level, ratio, "performance degrading");
        } else {
            info!(from = ?previous, to = ?level, ratio, "performance recovering");
        }
        Some(self.apply_level(level))
    }

    /// Put `level` in force. Applying the level already in force changes
    /// nothing and notifies nobody.
    pub fn apply_level(&mut self, level: DegradationLevel) -> DegradationSettings {
        let settings = DegradationSettings::from_table(&self.config.table, level);
        let changed = self.sender.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
        if changed {
            debug!(level = ?level, batch = settings.batch_size, quota = settings.max_agents_per_frame, interval = settings.update_interval, "degradation settings applied");
            metrics::gauge!("combat_rl.degradation_level", f64::from(level.severity()));
        }
        settings
    }

    /// Rolling statistics over the history window
    #[must_use]
    pub fn status(&self) -> PerformanceStatus {
        let frames: Vec<f64> = self.history.iter().map(FrameSample::frame_ms).collect();
        let latest = self.history.back().copied().unwrap_or_default();
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };

        let (mean, std_dev, max, p95) = if frames.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let mean = frames.iter().mean();
            let std_dev = frames.iter().std_dev();
            let max = Statistics::max(frames.iter());
            let p95 = Data::new(frames).percentile(95);
            (finite(mean), finite(std_dev), finite(max), finite(p95))
        };

        PerformanceStatus {
            settings: self.settings(),
            last_ratio: self.last_ratio,
            samples: self.samples,
            mean_frame_ms: mean,
            std_dev_frame_ms: std_dev,
            max_frame_ms: max,
            p95_frame_ms: p95,
            memory_bytes: latest.memory_bytes,
            agent_count: latest.agent_count,
        }
    }
}
