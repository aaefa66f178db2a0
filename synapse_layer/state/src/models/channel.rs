// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use synapse_common_types::{ProposalId, TaskId, ToolId};

use super::{proposal::Proposal, task::Task, tool::CommonTool};

/// The replicated state of a single channel. `treasury_balance` is unsigned
/// by construction; every debit path must check funds before subtracting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, Task>,
    #[serde(default)]
    pub proposals: BTreeMap<ProposalId, Proposal>,
    #[serde(default)]
    pub treasury_balance: u64,
    #[serde(default)]
    pub common_tools: BTreeMap<ToolId, CommonTool>,
}

impl ChannelState {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.proposals.is_empty()
            && self.common_tools.is_empty()
            && self.treasury_balance == 0
    }
}
