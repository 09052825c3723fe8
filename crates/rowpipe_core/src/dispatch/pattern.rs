use std::fmt;

use crate::graph::{PartitionConfig, PartitionMethod, StageDefinition};

/// How the copies of two neighboring stages are wired together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchPattern {
    /// One channel between two single copy stages.
    OneToOne,
    /// The single upstream copy feeds every downstream copy.
    OneToMany,
    /// Every upstream copy feeds the single downstream copy.
    ManyToOne,
    /// Copy `i` feeds copy `i` only.
    ManyToMany,
    /// Every upstream copy feeds every downstream copy.
    Cross,
}

impl DispatchPattern {
    /// Pick the pattern for a hop from `from` to `to`.
    pub fn for_hop(from: &StageDefinition, to: &StageDefinition) -> Self {
        Self::classify(from.copies, to.copies, is_repartitioning(from, to))
    }

    pub const fn classify(from_copies: usize, to_copies: usize, repartitioning: bool) -> Self {
        if from_copies == 1 && to_copies == 1 {
            Self::OneToOne
        } else if from_copies == 1 {
            Self::OneToMany
        } else if to_copies == 1 {
            Self::ManyToOne
        } else if from_copies == to_copies && !repartitioning {
            Self::ManyToMany
        } else {
            Self::Cross
        }
    }

    /// Number of channels this pattern creates.
    pub const fn channel_count(self, from_copies: usize, to_copies: usize) -> usize {
        match self {
            Self::OneToOne => 1,
            Self::OneToMany => to_copies,
            Self::ManyToOne => from_copies,
            Self::ManyToMany => from_copies,
            Self::Cross => from_copies * to_copies,
        }
    }

    /// All (upstream copy, downstream copy) pairs connected by a channel,
    /// ordered by upstream then downstream copy.
    pub fn pairs(self, from_copies: usize, to_copies: usize) -> Vec<(usize, usize)> {
        match self {
            Self::OneToOne => vec![(0, 0)],
            Self::OneToMany => (0..to_copies).map(|c| (0, c)).collect(),
            Self::ManyToOne => (0..from_copies).map(|c| (c, 0)).collect(),
            Self::ManyToMany => (0..from_copies).map(|c| (c, c)).collect(),
            Self::Cross => (0..from_copies)
                .flat_map(|f| (0..to_copies).map(move |t| (f, t)))
                .collect(),
        }
    }

    /// Downstream copies `from_copy` sends to.
    pub fn targets_of(self, from_copy: usize, to_copies: usize) -> Vec<usize> {
        match self {
            Self::OneToOne | Self::ManyToOne => vec![0],
            Self::OneToMany | Self::Cross => (0..to_copies).collect(),
            Self::ManyToMany => vec![from_copy],
        }
    }

    /// Upstream copies `to_copy` receives from.
    pub fn sources_of(self, to_copy: usize, from_copies: usize) -> Vec<usize> {
        match self {
            Self::OneToOne | Self::OneToMany => vec![0],
            Self::ManyToOne | Self::Cross => (0..from_copies).collect(),
            Self::ManyToMany => vec![to_copy],
        }
    }
}

impl fmt::Display for DispatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OneToOne => "1:1",
            Self::OneToMany => "1:N",
            Self::ManyToOne => "N:1",
            Self::ManyToMany => "N:N",
            Self::Cross => "N:M",
        };
        write!(f, "{s}")
    }
}

fn effective_partitioning(stage: &StageDefinition) -> Option<&PartitionConfig> {
    stage.partitioning.as_ref().filter(|p| p.is_partitioned())
}

/// If rows must be redistributed between `from` and `to`.
///
/// A partitioned upstream stage repartitions whenever the downstream
/// partitioning differs in any way. A non-partitioned upstream stage
/// repartitions when the downstream stage is partitioned.
pub fn is_repartitioning(from: &StageDefinition, to: &StageDefinition) -> bool {
    match effective_partitioning(from) {
        Some(partitioning) => effective_partitioning(to) != Some(partitioning),
        None => to.is_partitioned(),
    }
}

/// How a stage copy routes rows when writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repartitioning {
    /// Distribute or clone according to the stage's distribute flag.
    None,
    /// Route each row to a single partition.
    Special(PartitionConfig),
    /// Send every row to every output.
    Mirror,
}

impl Repartitioning {
    fn from_config(config: &PartitionConfig) -> Self {
        match config.method {
            PartitionMethod::None => Self::None,
            PartitionMethod::Modulo | PartitionMethod::Hash => Self::Special(config.clone()),
            PartitionMethod::Mirror => Self::Mirror,
        }
    }

    /// Derive the write routing of `stage` given its next data stages.
    ///
    /// An explicit target partitioning on the stage takes precedence.
    pub fn derive(stage: &StageDefinition, next: &[&StageDefinition]) -> Self {
        if let Some(target) = stage.target_partitioning.as_ref().filter(|p| p.is_partitioned()) {
            return Self::from_config(target);
        }

        let mut mode = Self::None;
        for next in next {
            let Some(next_partitioning) = effective_partitioning(next) else {
                continue;
            };
            match effective_partitioning(stage) {
                Some(own) if own == next_partitioning => (),
                _ => mode = Self::from_config(next_partitioning),
            }
        }
        mode
    }
}

impl fmt::Display for Repartitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Special(config) => write!(f, "special ({})", config.method),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}
