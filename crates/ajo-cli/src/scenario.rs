//! TOML scenarios: a circle config, seed balances, and a list of steps to replay.

use ajo_adapters::InMemoryAssetBank;
use ajo_core::{
    Amount, AttestationRef, CircleConfig, CircleLedger, CircleRegistry, CircleStatus, EventSink,
    Member, ParticipantId,
};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub circle: CircleConfig,
    #[serde(default)]
    pub balances: Vec<SeedBalance>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedBalance {
    pub account: String,
    #[serde(deserialize_with = "ajo_core::deserialize_amount")]
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Join {
        participant: String,
        attestation: String,
    },
    Contribute {
        participant: String,
    },
    Payout,
    Excuse {
        caller: String,
        participant: String,
    },
    FailNextPush {
        #[serde(default)]
        reason: Option<String>,
    },
    FailNextPull {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Contribute { .. } => "contribute",
            Self::Payout => "payout",
            Self::Excuse { .. } => "excuse",
            Self::FailNextPush { .. } => "fail_next_push",
            Self::FailNextPull { .. } => "fail_next_pull",
        }
    }
}

/// Summary of a validated scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub asset: String,
    pub max_members: u32,
    pub seeded_accounts: usize,
    pub steps: usize,
    pub joins: usize,
    pub payouts: usize,
}

/// Final state after replaying a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub status: CircleStatus,
    pub members: Vec<Member>,
    pub balances: BTreeMap<String, Amount>,
    pub steps_applied: usize,
    pub steps_failed: usize,
    pub events: usize,
    pub chain_verified: bool,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Validate the circle config and every step without touching any balance.
    pub fn check(&self) -> anyhow::Result<CheckSummary> {
        self.circle.validate()?;

        for (position, seed) in self.balances.iter().enumerate() {
            if seed.account.trim().is_empty() {
                bail!("balance row {} has an empty account", position + 1);
            }
        }

        let mut joins = 0;
        let mut payouts = 0;
        for (position, step) in self.steps.iter().enumerate() {
            let number = position + 1;
            match step {
                Step::Join {
                    participant,
                    attestation,
                } => {
                    require_name(number, "participant", participant)?;
                    require_name(number, "attestation", attestation)?;
                    joins += 1;
                }
                Step::Contribute { participant } => {
                    require_name(number, "participant", participant)?;
                }
                Step::Excuse {
                    caller,
                    participant,
                } => {
                    require_name(number, "caller", caller)?;
                    require_name(number, "participant", participant)?;
                }
                Step::Payout => payouts += 1,
                Step::FailNextPush { .. } | Step::FailNextPull { .. } => {}
            }
        }

        Ok(CheckSummary {
            asset: self.circle.asset.to_string(),
            max_members: self.circle.max_members,
            seeded_accounts: self.balances.len(),
            steps: self.steps.len(),
            joins,
            payouts,
        })
    }

    /// Replay the scenario against a fresh in-memory bank.
    ///
    /// Failed steps are logged and skipped; in strict mode the first failure aborts.
    pub fn run(&self, strict: bool, sink: Option<Arc<dyn EventSink>>) -> anyhow::Result<Report> {
        let bank = Arc::new(InMemoryAssetBank::new());
        for seed in &self.balances {
            bank.mint(self.circle.asset.clone(), &seed.account, seed.amount);
        }

        let mut registry = CircleRegistry::new(self.circle.asset.clone(), bank.clone());
        if let Some(sink) = sink {
            registry = registry.with_event_sink(sink);
        }
        let circle = registry
            .create_with_config(self.circle.clone())
            .context("failed to create circle")?;

        let mut applied = 0;
        let mut failed = 0;
        for (position, step) in self.steps.iter().enumerate() {
            let number = position + 1;
            match apply(&circle, &bank, step) {
                Ok(outcome) => {
                    applied += 1;
                    info!(step = number, action = step.action(), "{outcome}");
                }
                Err(err) => {
                    if strict {
                        bail!("step {number} ({}) failed: {err}", step.action());
                    }
                    failed += 1;
                    warn!(step = number, action = step.action(), error = %err, "step failed");
                }
            }
        }

        let queue = circle.payout_queue();
        let members = queue
            .iter()
            .filter_map(|participant| circle.member(participant))
            .collect();

        let mut balances = BTreeMap::new();
        for account in self
            .balances
            .iter()
            .map(|seed| seed.account.clone())
            .chain(queue.iter().map(ToString::to_string))
            .chain(std::iter::once(circle.custody_account().to_string()))
        {
            let amount = bank.balance(&self.circle.asset, &account);
            balances.insert(account, amount);
        }

        Ok(Report {
            status: circle.status(),
            members,
            balances,
            steps_applied: applied,
            steps_failed: failed,
            events: circle.events().len(),
            chain_verified: circle.verify_event_chain(),
        })
    }
}

fn require_name(step: usize, field: &str, value: &str) -> anyhow::Result<()> {
    if value.trim().is_empty() {
        bail!("step {step}: {field} must not be empty");
    }
    Ok(())
}

fn apply(
    circle: &CircleLedger,
    bank: &InMemoryAssetBank,
    step: &Step,
) -> Result<String, ajo_core::CircleError> {
    match step {
        Step::Join {
            participant,
            attestation,
        } => {
            let member = circle.join(
                ParticipantId::new(participant.as_str()),
                AttestationRef::new(attestation.as_str()),
            )?;
            Ok(format!("{participant} joined at slot {}", member.joined_at))
        }
        Step::Contribute { participant } => {
            let record = circle.contribute(&ParticipantId::new(participant.as_str()))?;
            Ok(format!(
                "{participant} paid {} for cycle {}",
                record.amount, record.cycle
            ))
        }
        Step::Payout => {
            let summary = circle.execute_payout()?;
            Ok(format!(
                "cycle {} paid {} to {} ({} contributors)",
                summary.cycle, summary.amount, summary.recipient, summary.contributors
            ))
        }
        Step::Excuse {
            caller,
            participant,
        } => {
            let excused = circle.excuse_missed(
                &ParticipantId::new(caller.as_str()),
                &ParticipantId::new(participant.as_str()),
            )?;
            Ok(if excused {
                format!("{participant} excused by {caller}")
            } else {
                format!("{participant} already excused")
            })
        }
        Step::FailNextPush { reason } => {
            bank.fail_next_push(reason.clone().unwrap_or_else(|| "scripted failure".into()));
            Ok("next push will fail".to_string())
        }
        Step::FailNextPull { reason } => {
            bank.fail_next_pull(reason.clone().unwrap_or_else(|| "scripted failure".into()));
            Ok("next pull will fail".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ajo_adapters::JsonLinesEventSink;
    use ajo_core::CircleState;

    const THREE_MEMBERS: &str = include_str!("../scenarios/three-members.toml");

    fn scenario(steps: &str) -> Scenario {
        let raw = format!(
            r#"
[circle]
asset = "cUSD"
contribution_amount = 100
max_members = 2
cycle_duration_secs = 604800
admin = "coordinator"

[[balances]]
account = "ada"
amount = 1000

[[balances]]
account = "bayo"
amount = 1000

{steps}
"#
        );
        Scenario::parse(&raw).unwrap()
    }

    #[test]
    fn bundled_scenario_replays_cleanly() {
        let scenario = Scenario::parse(THREE_MEMBERS).unwrap();
        let summary = scenario.check().unwrap();
        assert_eq!(summary.max_members, 3);
        assert_eq!(summary.joins, 3);

        let report = scenario.run(true, None).unwrap();
        assert_eq!(report.steps_failed, 0);
        assert_eq!(report.status.state, CircleState::Locked);
        assert!(report.status.current_cycle >= 1);
        assert!(report.chain_verified);
        assert_eq!(report.members.len(), 3);
    }

    #[test]
    fn failed_steps_are_counted_unless_strict() {
        let scenario = scenario(
            r#"
[[steps]]
action = "join"
participant = "ada"
attestation = "kyc-ada"

[[steps]]
action = "payout"

[[steps]]
action = "join"
participant = "bayo"
attestation = "kyc-bayo"

[[steps]]
action = "contribute"
participant = "ada"

[[steps]]
action = "fail_next_push"

[[steps]]
action = "payout"

[[steps]]
action = "payout"
"#,
        );

        let report = scenario.run(false, None).unwrap();
        assert_eq!(report.steps_failed, 2);
        assert_eq!(report.steps_applied, 5);
        assert_eq!(report.status.current_cycle, 1);
        assert_eq!(report.balances["ada"], 1_000);
        assert_eq!(report.balances["circle-0/custody"], 0);

        let err = scenario.run(true, None).unwrap_err();
        assert!(err.to_string().contains("step 2 (payout)"));
    }

    #[test]
    fn excuse_step_spares_the_penalty() {
        let scenario = scenario(
            r#"
[[steps]]
action = "join"
participant = "ada"
attestation = "kyc-ada"

[[steps]]
action = "join"
participant = "bayo"
attestation = "kyc-bayo"

[[steps]]
action = "contribute"
participant = "ada"

[[steps]]
action = "excuse"
caller = "coordinator"
participant = "bayo"

[[steps]]
action = "payout"
"#,
        );

        let report = scenario.run(true, None).unwrap();
        let bayo = report
            .members
            .iter()
            .find(|member| member.participant.as_str() == "bayo")
            .unwrap();
        assert_eq!(bayo.reputation, 0);
    }

    #[test]
    fn check_rejects_invalid_config_and_blank_names() {
        let mut bad = scenario("");
        bad.circle.max_members = 0;
        assert!(bad.check().is_err());

        let blank = scenario(
            r#"
[[steps]]
action = "contribute"
participant = " "
"#,
        );
        let err = blank.check().unwrap_err();
        assert!(err.to_string().contains("step 1"));
    }

    #[test]
    fn amounts_parse_from_toml_integers_and_strings() {
        let raw = r#"
[circle]
asset = "cUSD"
contribution_amount = 250
max_members = 2
cycle_duration_secs = 60
admin = "coordinator"

[[balances]]
account = "ada"
amount = 9000000000000000000

[[balances]]
account = "bayo"
amount = "100000000000000000000"
"#;
        let scenario = Scenario::parse(raw).unwrap();
        assert_eq!(scenario.circle.contribution_amount, 250);
        assert_eq!(scenario.balances[0].amount, 9_000_000_000_000_000_000);
        assert_eq!(scenario.balances[1].amount, 100_000_000_000_000_000_000);

        let negative = raw.replace("amount = 9000000000000000000", "amount = -1");
        assert!(Scenario::parse(&negative).is_err());
    }

    #[test]
    fn unknown_actions_fail_to_parse() {
        let raw = r#"
[circle]
asset = "cUSD"
contribution_amount = 100
max_members = 2
cycle_duration_secs = 60
admin = "coordinator"

[[steps]]
action = "withdraw"
"#;
        assert!(Scenario::parse(raw).is_err());
    }

    #[test]
    fn events_are_mirrored_to_a_json_lines_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = Arc::new(JsonLinesEventSink::append_to(&path).unwrap());

        let scenario = Scenario::parse(THREE_MEMBERS).unwrap();
        let report = scenario.run(true, Some(sink)).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), report.events);
    }
}
