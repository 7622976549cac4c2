use clap::{Parser, ValueEnum};

use crate::config::{OverflowPolicy, PipelineConfig, QueueCapacity, ShutdownPolicy};

#[derive(Parser, Debug)]
#[command(author, version, about = "Feed commands from stdin through a single-writer apply loop")]
pub struct Cli {
    /// Maximum number of queued commands. 0 means unbounded.
    #[arg(long, default_value_t = 0)]
    pub capacity: usize,

    /// What to do when a bounded queue is full.
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Block)]
    pub overflow: OverflowPolicy,

    /// Whether queued commands are applied or handed back on shutdown.
    #[arg(long, value_enum, default_value_t = ShutdownPolicy::Drain)]
    pub on_shutdown: ShutdownPolicy,

    /// How apply events are printed to stdout.
    #[arg(long, value_enum, default_value_t = EventFormat::Text)]
    pub events: EventFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventFormat {
    Text,
    Json,
    Off,
}

impl Cli {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_capacity(QueueCapacity::from_limit(self.capacity, self.overflow))
            .with_shutdown(self.on_shutdown)
    }
}
