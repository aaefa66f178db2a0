// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

mod channel;
mod command;
mod config;
mod network;
mod node;
mod proposal;
mod task;
mod tool;

pub use channel::ChannelState;
pub use command::{derive_command_id, ChannelSplitTarget, CommandOutcome, ExecutedCommand, Operation};
pub use config::{ConfigKeyError, NetworkConfig};
pub use network::{NetworkState, ReputationFormula};
pub use node::{NodeRecord, Reputation};
pub use proposal::{Ballot, Proposal, ProposalOutcome, ProposalStatus, ProposalType, VoteChoice};
pub use task::{Auction, Bid, Task, TaskStatus};
pub use tool::{CommonTool, ToolKind, ToolStatus};
