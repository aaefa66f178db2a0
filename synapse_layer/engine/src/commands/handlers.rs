// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! One handler per operation variant. Handlers mutate state directly and
//! report through [`CommandOutcome`]; they never read the wall clock or
//! draw randomness (nonces are seeded from the command id).

use log::*;
use serde_json::json;
use synapse_common_types::ChannelId;
use synapse_state::models::{
    ChannelSplitTarget,
    CommandOutcome,
    CommonTool,
    ExecutedCommand,
    NetworkState,
    Operation,
    ReputationFormula,
    ToolStatus,
};

const LOG_TARGET: &str = "synapse::engine::commands";

pub fn execute_operation(state: &mut NetworkState, entry: &ExecutedCommand) -> CommandOutcome {
    match entry.operation.clone() {
        Operation::SetConfig { key, value } => match state.config.set(&key, &value) {
            Ok(()) => CommandOutcome::ok(),
            Err(e) => CommandOutcome::failed(e.to_string()),
        },
        Operation::UpdateSchema { name, definition } => {
            if definition.fields.is_empty() {
                return CommandOutcome::failed("empty_schema");
            }
            for (field, spec) in &definition.fields {
                if spec.field_type == synapse_state::schema::FieldType::Enum
                    && spec.values.as_ref().map_or(true, Vec::is_empty)
                {
                    return CommandOutcome::failed(format!("enum field {} has no values", field));
                }
            }
            state.schemas.insert(name.clone(), definition);
            info!(target: LOG_TARGET, "Schema {} updated", name);
            CommandOutcome::ok()
        },
        Operation::SplitChannel { source, targets } => split_channel(state, &source, &targets),
        Operation::MergeChannels { sources, target } => merge_channels(state, &sources, &target),
        Operation::AcquireCommonTool {
            channel,
            tool_id,
            kind,
            description,
            monthly_cost_sp,
            credentials_to_encrypt,
        } => {
            let treasury = state.channel(&channel).map(|c| c.treasury_balance).unwrap_or(0);
            if state
                .channel(&channel)
                .is_some_and(|c| c.common_tools.contains_key(&tool_id))
            {
                return CommandOutcome::failed("tool_exists");
            }
            if treasury < monthly_cost_sp {
                return CommandOutcome::failed("insufficient_funds");
            }

            let key = synapse_crypto::derive_channel_key(&channel);
            let encrypted = match synapse_crypto::encrypt_with_seed(
                &key,
                credentials_to_encrypt.as_bytes(),
                entry.command_id.as_str().as_bytes(),
            ) {
                Ok(blob) => blob,
                Err(e) => return CommandOutcome::failed(e.to_string()),
            };

            let channel_state = state.channel_entry(&channel);
            channel_state.treasury_balance -= monthly_cost_sp;
            channel_state.common_tools.insert(tool_id.clone(), CommonTool {
                tool_id: tool_id.clone(),
                kind,
                description,
                status: ToolStatus::Active,
                monthly_cost_sp,
                last_payment_at: entry.ratified_at,
                encrypted_credentials: encrypted,
                created_at: entry.ratified_at,
                updated_at: entry.ratified_at,
            });
            info!(
                target: LOG_TARGET,
                "🔧 Tool {} acquired in {} for {} SP/month", tool_id, channel, monthly_cost_sp
            );
            CommandOutcome::ok_with(json!({ "tool_id": tool_id, "monthly_cost_sp": monthly_cost_sp }))
        },
        Operation::DeprecateCommonTool { channel, tool_id } => {
            let Some(tool) = state
                .channel_mut(&channel)
                .and_then(|c| c.common_tools.get_mut(&tool_id))
            else {
                return CommandOutcome::failed("tool_not_found");
            };
            if tool.status != ToolStatus::Deprecated {
                tool.status = ToolStatus::Deprecated;
                tool.updated_at = entry.ratified_at;
            }
            CommandOutcome::ok()
        },
        Operation::UpdateReputationFormula {
            base_offset,
            base_scale,
            bonus_scale,
        } => {
            state.reputation_formula = ReputationFormula {
                base_offset,
                base_scale,
                bonus_scale,
            };
            CommandOutcome::ok()
        },
        Operation::CodeUpgrade {
            package_hash,
            version,
            url,
        } => {
            // Recorded for the upgrade collaborator; the core never executes
            // foreign code.
            info!(target: LOG_TARGET, "Code upgrade {} recorded ({})", version, url);
            CommandOutcome::ok_with(json!({
                "deferred": true,
                "package_hash": package_hash,
                "version": version,
            }))
        },
    }
}

fn split_channel(state: &mut NetworkState, source: &ChannelId, targets: &[ChannelSplitTarget]) -> CommandOutcome {
    if state.channel(source).is_none() {
        return CommandOutcome::failed("channel_not_found");
    }

    let route = |tags: &[String]| -> Option<ChannelId> {
        targets
            .iter()
            .find(|target| target.tags.iter().any(|tag| tags.contains(tag)))
            .map(|target| target.channel.clone())
    };

    let source_state = state.channel_entry(source);
    let mut moved_tasks = Vec::new();
    let task_ids: Vec<_> = source_state.tasks.keys().cloned().collect();
    for id in task_ids {
        let destination = route(&source_state.tasks[&id].tags);
        if let Some(destination) = destination {
            let task = source_state.tasks.remove(&id).expect("id taken from key set");
            moved_tasks.push((destination, task));
        }
    }
    let mut moved_proposals = Vec::new();
    let proposal_ids: Vec<_> = source_state.proposals.keys().cloned().collect();
    for id in proposal_ids {
        let destination = route(&source_state.proposals[&id].tags);
        if let Some(destination) = destination {
            let proposal = source_state.proposals.remove(&id).expect("id taken from key set");
            moved_proposals.push((destination, proposal));
        }
    }

    let task_count = moved_tasks.len();
    let proposal_count = moved_proposals.len();
    for (destination, task) in moved_tasks {
        state.channel_entry(&destination).tasks.insert(task.id.clone(), task);
    }
    for (destination, proposal) in moved_proposals {
        state
            .channel_entry(&destination)
            .proposals
            .insert(proposal.id.clone(), proposal);
    }
    info!(
        target: LOG_TARGET,
        "Channel {} split: {} tasks, {} proposals moved", source, task_count, proposal_count
    );
    CommandOutcome::ok_with(json!({ "tasks_moved": task_count, "proposals_moved": proposal_count }))
}

/// Union-merges the source channels into the target with the same LWW rules
/// the gossip merge uses, then removes the sources. Treasuries are summed.
fn merge_channels(state: &mut NetworkState, sources: &[ChannelId], target: &ChannelId) -> CommandOutcome {
    let mut merged = 0usize;
    for source in sources {
        if source == target {
            continue;
        }
        let Some(source_state) = state.channels.remove(source) else {
            continue;
        };
        let target_state = state.channel_entry(target);
        target_state.treasury_balance += source_state.treasury_balance;

        for (id, task) in source_state.tasks {
            match target_state.tasks.get(&id) {
                Some(existing) if existing.updated_at >= task.updated_at => {},
                _ => {
                    target_state.tasks.insert(id, task);
                },
            }
        }
        for (id, proposal) in source_state.proposals {
            match target_state.proposals.get(&id) {
                Some(existing) if existing.updated_at >= proposal.updated_at => {},
                _ => {
                    target_state.proposals.insert(id, proposal);
                },
            }
        }
        for (id, tool) in source_state.common_tools {
            match target_state.common_tools.get(&id) {
                Some(existing) if existing.updated_at >= tool.updated_at => {},
                _ => {
                    target_state.common_tools.insert(id, tool);
                },
            }
        }
        merged += 1;
    }
    info!(target: LOG_TARGET, "{} channels merged into {}", merged, target);
    CommandOutcome::ok_with(json!({ "channels_merged": merged }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use synapse_common_types::{NodeId, ProposalId, TaskId, Timestamp, ToolId};
    use synapse_state::models::{derive_command_id, NetworkConfig, Task, TaskStatus, ToolKind};

    use super::*;

    fn now() -> Timestamp {
        "2024-06-01T00:00:00Z".parse().unwrap()
    }

    fn entry_for(operation: Operation) -> ExecutedCommand {
        let proposal_id = ProposalId::new("prop_1");
        ExecutedCommand {
            command_id: derive_command_id(&proposal_id, &[NodeId::new("v1")]),
            proposal_id,
            operation,
            ratified_at: now(),
            ratified_by: vec![NodeId::new("v1")],
            executed_at: None,
            result: None,
        }
    }

    fn task_tagged(id: &str, tags: &[&str]) -> Task {
        Task {
            id: TaskId::new(id),
            schema_name: "task_v1".to_string(),
            title: id.to_string(),
            description: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            status: TaskStatus::Open,
            creator: NodeId::new("creator"),
            assignee: None,
            reward: 1,
            required_tools: vec![],
            auction: None,
            bids: BTreeMap::new(),
            created_at: now(),
            updated_at: now(),
            completed_at: None,
        }
    }

    #[test]
    fn acquire_tool_encrypts_and_debits() {
        let mut state = NetworkState::bootstrap(NetworkConfig::default());
        state.channel_entry(&ChannelId::global()).treasury_balance = 150;

        let entry = entry_for(Operation::AcquireCommonTool {
            channel: ChannelId::global(),
            tool_id: ToolId::new("stripe"),
            kind: ToolKind::ApiKey,
            description: "payments".to_string(),
            monthly_cost_sp: 50,
            credentials_to_encrypt: "sk_abc123".to_string(),
        });
        let outcome = execute_operation(&mut state, &entry);
        assert!(outcome.success);

        let channel = state.channel(&ChannelId::global()).unwrap();
        assert_eq!(channel.treasury_balance, 100);
        let tool = &channel.common_tools[&ToolId::new("stripe")];
        assert_eq!(tool.status, ToolStatus::Active);
        assert!(!tool.encrypted_credentials.is_empty());
        assert_ne!(tool.encrypted_credentials, b"sk_abc123".to_vec());
        // Credentials decrypt under the channel key
        let key = synapse_crypto::derive_channel_key(&ChannelId::global());
        let plain = synapse_crypto::decrypt(&key, &tool.encrypted_credentials).unwrap();
        assert_eq!(plain.as_slice(), b"sk_abc123");
    }

    #[test]
    fn acquire_tool_with_insufficient_treasury_fails_cleanly() {
        let mut state = NetworkState::bootstrap(NetworkConfig::default());
        state.channel_entry(&ChannelId::global()).treasury_balance = 50;

        let entry = entry_for(Operation::AcquireCommonTool {
            channel: ChannelId::global(),
            tool_id: ToolId::new("stripe"),
            kind: ToolKind::ApiKey,
            description: String::new(),
            monthly_cost_sp: 100,
            credentials_to_encrypt: "sk_abc123".to_string(),
        });
        let outcome = execute_operation(&mut state, &entry);
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("insufficient_funds"));
        let channel = state.channel(&ChannelId::global()).unwrap();
        assert_eq!(channel.treasury_balance, 50);
        assert!(channel.common_tools.is_empty());
    }

    #[test]
    fn acquire_existing_tool_id_fails() {
        let mut state = NetworkState::bootstrap(NetworkConfig::default());
        state.channel_entry(&ChannelId::global()).treasury_balance = 200;
        let op = Operation::AcquireCommonTool {
            channel: ChannelId::global(),
            tool_id: ToolId::new("stripe"),
            kind: ToolKind::ApiKey,
            description: String::new(),
            monthly_cost_sp: 50,
            credentials_to_encrypt: "sk_abc123".to_string(),
        };
        assert!(execute_operation(&mut state, &entry_for(op.clone())).success);
        let outcome = execute_operation(&mut state, &entry_for(op));
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("tool_exists"));
    }

    // A zero-cost tool acquires and bills with zero treasury debit
    #[test]
    fn zero_cost_tool_acquires_with_zero_debit() {
        let mut state = NetworkState::bootstrap(NetworkConfig::default());
        let entry = entry_for(Operation::AcquireCommonTool {
            channel: ChannelId::global(),
            tool_id: ToolId::new("free"),
            kind: ToolKind::Webhook,
            description: String::new(),
            monthly_cost_sp: 0,
            credentials_to_encrypt: "https://example.com".to_string(),
        });
        assert!(execute_operation(&mut state, &entry).success);
        assert_eq!(state.channel(&ChannelId::global()).unwrap().treasury_balance, 0);
    }

    #[test]
    fn split_channel_routes_by_tag() {
        let mut state = NetworkState::bootstrap(NetworkConfig::default());
        let source = ChannelId::new("everything");
        let channel = state.channel_entry(&source);
        channel.tasks.insert(TaskId::new("t_rust"), task_tagged("t_rust", &["rust"]));
        channel.tasks.insert(TaskId::new("t_web"), task_tagged("t_web", &["frontend"]));
        channel.tasks.insert(TaskId::new("t_misc"), task_tagged("t_misc", &["ops"]));

        let entry = entry_for(Operation::SplitChannel {
            source: source.clone(),
            targets: vec![
                ChannelSplitTarget {
                    channel: ChannelId::new("rust"),
                    tags: vec!["rust".to_string()],
                },
                ChannelSplitTarget {
                    channel: ChannelId::new("web"),
                    tags: vec!["frontend".to_string()],
                },
            ],
        });
        let outcome = execute_operation(&mut state, &entry);
        assert!(outcome.success);
        assert!(state.channel(&ChannelId::new("rust")).unwrap().tasks.contains_key(&TaskId::new("t_rust")));
        assert!(state.channel(&ChannelId::new("web")).unwrap().tasks.contains_key(&TaskId::new("t_web")));
        // Unmatched entities stay put
        assert!(state.channel(&source).unwrap().tasks.contains_key(&TaskId::new("t_misc")));
    }

    #[test]
    fn merge_channels_unions_with_lww_and_sums_treasuries() {
        let mut state = NetworkState::bootstrap(NetworkConfig::default());
        let a = ChannelId::new("a");
        let b = ChannelId::new("b");
        state.channel_entry(&a).treasury_balance = 30;
        state.channel_entry(&b).treasury_balance = 12;

        let mut older = task_tagged("shared", &["x"]);
        older.title = "older".to_string();
        let mut newer = task_tagged("shared", &["x"]);
        newer.title = "newer".to_string();
        newer.updated_at = now() + std::time::Duration::from_secs(5);
        state.channel_entry(&a).tasks.insert(older.id.clone(), older);
        state.channel_entry(&b).tasks.insert(newer.id.clone(), newer);

        let entry = entry_for(Operation::MergeChannels {
            sources: vec![a.clone(), b.clone()],
            target: ChannelId::new("merged"),
        });
        assert!(execute_operation(&mut state, &entry).success);

        assert!(state.channel(&a).is_none());
        assert!(state.channel(&b).is_none());
        let merged = state.channel(&ChannelId::new("merged")).unwrap();
        assert_eq!(merged.treasury_balance, 42);
        assert_eq!(merged.tasks[&TaskId::new("shared")].title, "newer");
    }

    #[test]
    fn update_reputation_formula_applies() {
        let mut state = NetworkState::bootstrap(NetworkConfig::default());
        let entry = entry_for(Operation::UpdateReputationFormula {
            base_offset: 0.5,
            base_scale: 2.0,
            bonus_scale: 0.25,
        });
        assert!(execute_operation(&mut state, &entry).success);
        assert!((state.reputation_formula.base_scale - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn update_schema_validates_enum_values() {
        use synapse_state::schema::{FieldSpec, SchemaDefinition};
        let mut state = NetworkState::bootstrap(NetworkConfig::default());

        let bad = SchemaDefinition {
            fields: BTreeMap::from([(
                "kind".to_string(),
                serde_json::from_value::<FieldSpec>(serde_json::json!({"type": "enum"})).unwrap(),
            )]),
        };
        let outcome = execute_operation(&mut state, &entry_for(Operation::UpdateSchema {
            name: "bad_v1".to_string(),
            definition: bad,
        }));
        assert!(!outcome.success);

        let good = SchemaDefinition {
            fields: BTreeMap::from([(
                "title".to_string(),
                serde_json::from_value::<FieldSpec>(serde_json::json!({"type": "string", "required": true}))
                    .unwrap(),
            )]),
        };
        let outcome = execute_operation(&mut state, &entry_for(Operation::UpdateSchema {
            name: "note_v1".to_string(),
            definition: good,
        }));
        assert!(outcome.success);
        assert!(state.schemas.contains_key("note_v1"));
    }
}
