//! Renovate upgrade records.
//!
//! The upgrades payload is an array of objects following a subset of the
//! Renovate template field `upgrades`. Unknown fields are ignored;
//! validation failures cite the failing element.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bundle::{is_valid_digest, BundleRef};
use crate::error::Error;
use crate::{DEP_TYPE_TASK_BUNDLE, KONFLUX_ORG_PREFIX};

/// One dependency bump as reported by Renovate.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Upgrade {
    pub dep_name: String,
    pub current_value: String,
    pub current_digest: String,
    pub new_value: String,
    pub new_digest: String,
    pub package_file: String,
    pub parent_dir: String,
    pub dep_types: Vec<String>,
}

impl Upgrade {
    /// Full reference of the bundle currently in use.
    pub fn current_bundle(&self) -> String {
        format!(
            "{}:{}@{}",
            self.dep_name, self.current_value, self.current_digest
        )
    }

    /// Full reference of the bundle being upgraded to.
    pub fn new_bundle(&self) -> String {
        format!("{}:{}@{}", self.dep_name, self.new_value, self.new_digest)
    }

    /// Reference of the new bundle as a [`BundleRef`].
    pub fn new_ref(&self) -> BundleRef {
        BundleRef::new(&self.dep_name)
            .with_tag(&self.new_value)
            .with_digest(&self.new_digest)
    }

    /// Whether the dependency is handled by the tekton-bundle manager.
    pub fn is_task_bundle(&self) -> bool {
        self.dep_types.iter().any(|t| t == DEP_TYPE_TASK_BUNDLE)
    }

    /// Whether the bundle comes from the Konflux task organization.
    ///
    /// Setting `PMT_LOCAL_TEST` relaxes the restriction so bundles from
    /// arbitrary registries can be exercised during development.
    pub fn comes_from_konflux(&self) -> bool {
        if std::env::var_os("PMT_LOCAL_TEST").is_some() {
            warn!(
                "PMT_LOCAL_TEST is set; accepting bundles from arbitrary registry organizations"
            );
            return true;
        }
        self.dep_name.starts_with(KONFLUX_ORG_PREFIX)
    }

    fn validate(&self, index: usize) -> Result<(), Error> {
        let fail = |msg: String| Err(Error::InvalidInput(format!("upgrades[{index}]: {msg}")));
        if self.dep_name.is_empty() {
            return fail("depName is empty".into());
        }
        if self.current_value.is_empty() {
            return fail("currentValue is empty".into());
        }
        if self.new_value.is_empty() {
            return fail("newValue is empty".into());
        }
        if self.package_file.is_empty() {
            return fail("packageFile is empty".into());
        }
        if self.parent_dir.is_empty() {
            return fail("parentDir is empty".into());
        }
        if !is_valid_digest(&self.current_digest) {
            return fail(format!(
                "currentDigest {:?} is not a valid sha256 digest",
                self.current_digest
            ));
        }
        if !is_valid_digest(&self.new_digest) {
            return fail(format!(
                "newDigest {:?} is not a valid sha256 digest",
                self.new_digest
            ));
        }
        Ok(())
    }
}

/// Parse and validate an upgrades JSON payload.
///
/// Null elements are silently dropped. Any other invalid element fails the
/// whole parse with a message citing its position.
pub fn parse_upgrades(input: &str) -> Result<Vec<Upgrade>, Error> {
    let raw: serde_json::Value = serde_json::from_str(input)
        .map_err(|e| Error::InvalidInput(format!("upgrades is not valid JSON: {e}")))?;
    let items = match raw {
        serde_json::Value::Array(items) => items,
        _ => {
            return Err(Error::InvalidInput(
                "upgrades must be a JSON array of upgrade objects".into(),
            ))
        }
    };

    let mut upgrades = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        if item.is_null() {
            continue;
        }
        let upgrade: Upgrade = serde_json::from_value(item)
            .map_err(|e| Error::InvalidInput(format!("upgrades[{index}]: {e}")))?;
        upgrade.validate(index)?;
        upgrades.push(upgrade);
    }
    Ok(upgrades)
}

/// Keep only upgrades this tool handles: tekton-bundle typed dependencies
/// from the Konflux organization.
pub fn filter_task_bundle_upgrades(upgrades: Vec<Upgrade>) -> Vec<Upgrade> {
    upgrades
        .into_iter()
        .filter(|u| {
            if !u.is_task_bundle() {
                debug!(
                    "dependency {} is not handled by the tekton-bundle manager",
                    u.dep_name
                );
                return false;
            }
            if !u.comes_from_konflux() {
                info!(
                    "dependency {} does not come from Konflux task definitions",
                    u.dep_name
                );
                return false;
            }
            true
        })
        .collect()
}

/// De-duplicate upgrades by `(depName, currentDigest, newDigest)`,
/// preserving input order.
pub fn dedupe_upgrades(upgrades: Vec<Upgrade>) -> Vec<Upgrade> {
    let mut seen = std::collections::HashSet::new();
    upgrades
        .into_iter()
        .filter(|u| {
            seen.insert((
                u.dep_name.clone(),
                u.current_digest.clone(),
                u.new_digest.clone(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_A: &str = "sha256:0a0a";
    const DIGEST_B: &str = "sha256:0b0b";

    fn upgrade_json(dep_name: &str, package_file: &str) -> serde_json::Value {
        serde_json::json!({
            "depName": dep_name,
            "currentValue": "0.1",
            "currentDigest": DIGEST_A,
            "newValue": "0.2",
            "newDigest": DIGEST_B,
            "packageFile": package_file,
            "parentDir": ".tekton",
            "depTypes": ["tekton-bundle"],
        })
    }

    #[test]
    fn test_parse_valid_upgrades() {
        let payload = serde_json::json!([upgrade_json("quay.io/konflux-ci/task-clone", "a.yaml")]);
        let upgrades = parse_upgrades(&payload.to_string()).unwrap();
        assert_eq!(upgrades.len(), 1);
        assert_eq!(
            upgrades[0].current_bundle(),
            format!("quay.io/konflux-ci/task-clone:0.1@{DIGEST_A}")
        );
    }

    #[test]
    fn test_parse_ignores_unknown_fields_and_nulls() {
        let mut item = upgrade_json("quay.io/konflux-ci/task-clone", "a.yaml");
        item["somethingRenovateAdds"] = serde_json::json!({"x": 1});
        let payload = serde_json::json!([serde_json::Value::Null, item]);
        let upgrades = parse_upgrades(&payload.to_string()).unwrap();
        assert_eq!(upgrades.len(), 1);
    }

    #[test]
    fn test_parse_cites_failing_element() {
        let mut bad = upgrade_json("quay.io/konflux-ci/task-clone", "a.yaml");
        bad["newDigest"] = serde_json::json!("not-a-digest");
        let payload =
            serde_json::json!([upgrade_json("quay.io/konflux-ci/task-other", "b.yaml"), bad]);
        let err = parse_upgrades(&payload.to_string()).unwrap_err();
        assert!(err.to_string().contains("upgrades[1]"), "{err}");
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(parse_upgrades("{}").is_err());
        assert!(parse_upgrades("not json").is_err());
    }

    #[test]
    fn test_filter_drops_non_task_bundles() {
        let mut other = upgrade_json("quay.io/konflux-ci/task-clone", "a.yaml");
        other["depTypes"] = serde_json::json!(["docker"]);
        let payload = serde_json::json!([
            other,
            upgrade_json("quay.io/konflux-ci/task-clone", "a.yaml")
        ]);
        let upgrades = parse_upgrades(&payload.to_string()).unwrap();
        let kept = filter_task_bundle_upgrades(upgrades);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_dedupe_preserves_input_order() {
        let payload = serde_json::json!([
            upgrade_json("quay.io/konflux-ci/task-a", "a.yaml"),
            upgrade_json("quay.io/konflux-ci/task-b", "b.yaml"),
            upgrade_json("quay.io/konflux-ci/task-a", "c.yaml"),
        ]);
        let upgrades = parse_upgrades(&payload.to_string()).unwrap();
        let deduped = dedupe_upgrades(upgrades);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].dep_name, "quay.io/konflux-ci/task-a");
        assert_eq!(deduped[0].package_file, "a.yaml");
        assert_eq!(deduped[1].dep_name, "quay.io/konflux-ci/task-b");
    }
}
