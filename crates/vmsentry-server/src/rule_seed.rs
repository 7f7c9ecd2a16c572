use std::collections::HashSet;

use vmsentry_storage::AlertStore;

use crate::config::RulesSeedFile;

/// Counters reported by [`apply_seed`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub vms: u32,
    pub group_members: u32,
    pub rules_created: u32,
    pub rules_skipped: u32,
    pub rules_failed: u32,
}

/// Loads VMs, group memberships and rules into the store.
///
/// VMs are upserted. Rules whose name already exists are skipped, so the
/// same file can be applied on every start. A rule that fails validation is
/// logged and counted; the rest of the file still applies.
pub async fn apply_seed(store: &AlertStore, seed: &RulesSeedFile) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    for vm in &seed.vms {
        store.upsert_vm(vm).await?;
        report.vms += 1;
    }

    for group in &seed.groups {
        for member in &group.members {
            if store.add_group_member(&group.id, member).await? {
                report.group_members += 1;
            }
        }
    }

    let existing: HashSet<String> = store
        .list_rules(None)
        .await?
        .into_iter()
        .map(|r| r.name)
        .collect();

    for draft in &seed.rules {
        if existing.contains(draft.name.trim()) {
            tracing::warn!(name = %draft.name, "Alert rule already exists, skipping");
            report.rules_skipped += 1;
            continue;
        }
        match store.create_rule(draft).await {
            Ok(rule) => {
                tracing::info!(name = %rule.name, id = %rule.id, "Alert rule created");
                report.rules_created += 1;
            }
            Err(e) => {
                tracing::error!(name = %draft.name, error = %e, "Failed to create alert rule");
                report.rules_failed += 1;
            }
        }
    }

    tracing::info!(
        vms = report.vms,
        group_members = report.group_members,
        created = report.rules_created,
        skipped = report.rules_skipped,
        failed = report.rules_failed,
        "Seed applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed() -> RulesSeedFile {
        serde_json::from_str(
            r#"{
                "vms": [
                    {"id": "vm-1", "name": "web-01", "status": "running", "clusterId": "cl-1"},
                    {"id": "vm-2", "name": "web-02", "status": "running", "clusterId": "cl-1"}
                ],
                "groups": [{"id": "web", "members": ["vm-1", "vm-2"]}],
                "rules": [
                    {
                        "name": "cpu high",
                        "severity": "high",
                        "scope": "group",
                        "scopeId": "web",
                        "conditions": [{"metric": "cpu_usage", "operator": ">", "threshold": 90}]
                    },
                    {
                        "name": "broken",
                        "severity": "low",
                        "scope": "cluster",
                        "conditions": []
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        vmsentry_common::id::init(1, 1);
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("seed.db").display());
        let store = AlertStore::connect(&url).await.unwrap();

        let first = apply_seed(&store, &seed()).await.unwrap();
        assert_eq!(first.vms, 2);
        assert_eq!(first.group_members, 2);
        assert_eq!(first.rules_created, 1);
        assert_eq!(first.rules_failed, 1);

        let second = apply_seed(&store, &seed()).await.unwrap();
        assert_eq!(second.group_members, 0);
        assert_eq!(second.rules_created, 0);
        assert_eq!(second.rules_skipped, 1);

        assert_eq!(store.list_rules(None).await.unwrap().len(), 1);
    }
}
